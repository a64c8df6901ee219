//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kb_harness::answer::AnswerGenerator;
use kb_harness::chunk::ChunkingParams;
use kb_harness::embedder::Embedder;
use kb_harness::embedding::EmbeddingProvider;
use kb_harness::generation::{GenerationProvider, Prompt};
use kb_harness::kb::{KbOptions, KnowledgeBase};
use kb_harness::provider::{ProviderError, RetryPolicy};
use kb_harness::tokenizer::WhitespaceTokenizer;

/// Three eight-word sentences; with 8-token windows and no overlap each
/// sentence becomes exactly one chunk.
pub const POLICY_DOC: &str = "Fire damage to the main dwelling is covered.\n\
Flood damage needs a separate flood insurance policy.\n\
Theft of personal belongings is covered with receipts.";

pub const FLOOD_QUESTION: &str = "Does flood insurance cover flood damage?";

pub const DIMS: usize = 256;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words hashing embedder: deterministic, no network.
///
/// Texts containing `slow_marker` take `delay` per batch; texts containing
/// `fail_marker` are rejected with a permanent error.
pub struct HashEmbedder {
    pub delay: Duration,
    pub slow_marker: Option<String>,
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            slow_marker: None,
            fail_marker: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for w in words(text) {
            v[(fnv1a(&w) % DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(ProviderError::Rejected("poisoned input".into()));
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let slow = match &self.slow_marker {
            Some(marker) => texts.iter().any(|t| t.contains(marker.as_str())),
            None => true,
        };
        if slow && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Records every prompt and answers with a fixed string.
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<Prompt>>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok("Flood damage needs a separate flood insurance policy.".to_string())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

pub struct Harness {
    pub kb: Arc<KnowledgeBase>,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<RecordingGenerator>,
}

pub struct HarnessBuilder {
    pub embedder: HashEmbedder,
    pub batch_size: usize,
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub top_k: usize,
    pub index_dir: Option<PathBuf>,
    pub ingest_timeout: Duration,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            embedder: HashEmbedder::new(),
            batch_size: 16,
            chunk_tokens: 8,
            overlap_tokens: 0,
            top_k: 2,
            index_dir: None,
            ingest_timeout: Duration::from_secs(30),
        }
    }

    pub fn build(self) -> Harness {
        let embedder = Arc::new(self.embedder);
        let generator = Arc::new(RecordingGenerator::new());
        let tokenizer = Arc::new(WhitespaceTokenizer);
        let answerer = AnswerGenerator::new(
            generator.clone(),
            tokenizer.clone(),
            None,
            4096,
            fast_retry(),
        )
        .unwrap();
        let kb = KnowledgeBase::new(
            tokenizer,
            ChunkingParams::new(self.chunk_tokens, self.overlap_tokens).unwrap(),
            Embedder::new(embedder.clone(), self.batch_size, fast_retry()),
            answerer,
            KbOptions {
                top_k: self.top_k,
                index_dir: self.index_dir,
                ingest_timeout: self.ingest_timeout,
            },
        );
        Harness {
            kb: Arc::new(kb),
            embedder,
            generator,
        }
    }
}
