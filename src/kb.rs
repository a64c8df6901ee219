//! The knowledge base: the one piece of shared mutable state.
//!
//! Holds the currently published [`VectorIndex`] behind a read/write lock that
//! is only ever held long enough to clone or swap an `Arc`. Readers take a
//! snapshot at the start of a request and keep using it even if a rebuild
//! publishes a new index meanwhile.
//!
//! Rebuilds are serialized by an async mutex:
//!
//! ```text
//! text ──► chunk ──► embed (bounded by ingest timeout) ──► build ──► persist ──► publish
//! ```
//!
//! A failure at any step before publish leaves the previous index in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::answer::AnswerGenerator;
use crate::chunk::{chunk_text, ChunkingParams};
use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::{KbError, Result};
use crate::extract::extract_file;
use crate::index::{IndexManifest, VectorIndex};
use crate::models::{Answer, Chunk, IngestReport, RetrievalResult};
use crate::progress::{IngestEvent, IngestProgress};
use crate::retrieve::retrieve;
use crate::tokenizer::{create_tokenizer, Tokenizer};

/// Knobs that are not owned by one of the pipeline components.
#[derive(Debug, Clone)]
pub struct KbOptions {
    pub top_k: usize,
    /// Where to persist the index; `None` keeps it in memory only.
    pub index_dir: Option<PathBuf>,
    pub ingest_timeout: Duration,
}

struct Published {
    index: Arc<VectorIndex>,
    manifest: IndexManifest,
}

/// Summary for `/health` and `kbh status`.
#[derive(Debug, Clone, Serialize)]
pub struct KbStatus {
    pub ready: bool,
    pub chunks: usize,
    pub dims: usize,
    pub model: String,
    pub document_sha256: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
}

pub struct KnowledgeBase {
    tokenizer: Arc<dyn Tokenizer>,
    params: ChunkingParams,
    embedder: Embedder,
    answerer: AnswerGenerator,
    options: KbOptions,
    current: RwLock<Option<Arc<Published>>>,
    rebuild_guard: tokio::sync::Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        params: ChunkingParams,
        embedder: Embedder,
        answerer: AnswerGenerator,
        options: KbOptions,
    ) -> Self {
        Self {
            tokenizer,
            params,
            embedder,
            answerer,
            options,
            current: RwLock::new(None),
            rebuild_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire up providers and the tokenizer from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tokenizer = create_tokenizer(&config.chunking.tokenizer)?;
        let params = config.chunking.params()?;
        let embedder = Embedder::from_config(&config.embedding)?;
        let answerer = AnswerGenerator::from_config(&config.generation, tokenizer.clone())?;
        Ok(Self::new(
            tokenizer,
            params,
            embedder,
            answerer,
            KbOptions {
                top_k: config.retrieval.top_k,
                index_dir: Some(config.index.dir.clone()),
                ingest_timeout: config.ingest.timeout(),
            },
        ))
    }

    pub fn top_k(&self) -> usize {
        self.options.top_k
    }

    /// The index every request in flight right now should use.
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.published().map(|p| p.index.clone())
    }

    fn published(&self) -> Option<Arc<Published>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, published: Published) {
        let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(published));
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().map(|i| !i.is_empty()).unwrap_or(false)
    }

    /// Split text with the configured tokenizer and window sizes.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        chunk_text(self.tokenizer.as_ref(), text, self.params)
    }

    /// Replace the index with one built from `text`.
    ///
    /// Only one rebuild runs at a time; a second caller waits for the first.
    pub async fn rebuild(&self, text: &str, progress: &dyn IngestProgress) -> Result<IngestReport> {
        let _guard = self.rebuild_guard.lock().await;
        let started = Instant::now();
        let document_sha256 = hex::encode(Sha256::digest(text.as_bytes()));

        let chunks = self.chunk(text);
        progress.report(IngestEvent::Chunked {
            chunks: chunks.len(),
        });
        info!(chunks = chunks.len(), sha256 = %document_sha256, "document chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedding = self.embedder.embed_with_progress(&texts, |n, total| {
            progress.report(IngestEvent::Embedding { n, total })
        });
        let vectors = match tokio::time::timeout(self.options.ingest_timeout, embedding).await {
            Ok(result) => result?,
            Err(_) => {
                let secs = self.options.ingest_timeout.as_secs();
                warn!(timeout_secs = secs, "ingest timed out during embedding");
                return Err(KbError::IngestTimeout(secs));
            }
        };

        let dims = self.embedder.dims();
        let index = VectorIndex::build(dims, chunks, vectors)?;
        let manifest = IndexManifest {
            model: self.embedder.model_name().to_string(),
            dims,
            chunk_tokens: self.params.chunk_tokens(),
            overlap_tokens: self.params.overlap_tokens(),
            tokenizer: self.tokenizer.name().to_string(),
            document_sha256: document_sha256.clone(),
            built_at: Utc::now(),
        };

        if let Some(dir) = &self.options.index_dir {
            index.save(dir, &manifest)?;
            info!(dir = %dir.display(), "index persisted");
        }

        let chunks_indexed = index.len();
        self.publish(Published {
            index: Arc::new(index),
            manifest,
        });
        progress.report(IngestEvent::Published {
            chunks: chunks_indexed,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(chunks = chunks_indexed, dims, elapsed_ms, "index published");
        Ok(IngestReport {
            chunks_indexed,
            dims,
            document_sha256,
            elapsed_ms,
        })
    }

    /// Extract text from a file and rebuild from it.
    pub async fn ingest_file(&self, path: &Path, progress: &dyn IngestProgress) -> Result<IngestReport> {
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_file(&owned))
            .await
            .map_err(|e| KbError::Extraction(format!("extraction task failed: {}", e)))??;
        info!(path = %path.display(), chars = text.len(), "text extracted");
        self.rebuild(&text, progress).await
    }

    /// Publish the index persisted by an earlier run, if there is one.
    ///
    /// Returns `Ok(false)` when no index exists on disk.
    pub fn load_persisted(&self) -> Result<bool> {
        let Some(dir) = &self.options.index_dir else {
            return Ok(false);
        };
        if !VectorIndex::exists(dir) {
            return Ok(false);
        }
        let (index, manifest) = VectorIndex::load(dir, self.embedder.dims())?;
        if manifest.model != self.embedder.model_name() {
            warn!(
                stored = %manifest.model,
                configured = %self.embedder.model_name(),
                "persisted index was built with a different embedding model"
            );
        }
        info!(chunks = index.len(), dims = index.dims(), "loaded persisted index");
        self.publish(Published {
            index: Arc::new(index),
            manifest,
        });
        Ok(true)
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        retrieve(self.snapshot(), &self.embedder, query, k).await
    }

    /// Retrieve `top_k` chunks for `query` and generate a grounded answer.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let retrieved = self.retrieve(query, self.options.top_k).await?;
        self.answerer.answer(query, &retrieved).await
    }

    pub fn status(&self) -> KbStatus {
        match self.published() {
            Some(p) => KbStatus {
                ready: !p.index.is_empty(),
                chunks: p.index.len(),
                dims: p.index.dims(),
                model: p.manifest.model.clone(),
                document_sha256: Some(p.manifest.document_sha256.clone()),
                built_at: Some(p.manifest.built_at),
            },
            None => KbStatus {
                ready: false,
                chunks: 0,
                dims: self.embedder.dims(),
                model: self.embedder.model_name().to_string(),
                document_sha256: None,
                built_at: None,
            },
        }
    }
}
