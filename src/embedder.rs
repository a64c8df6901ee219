//! Batched, retrying embedding client.
//!
//! Wraps an [`EmbeddingProvider`] and turns provider calls into pipeline
//! results: inputs are split into `batch_size` batches, transient failures are
//! retried with capped exponential backoff, and every returned vector is
//! checked against the configured dimensionality before it reaches the index.

use std::sync::Arc;

use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{KbError, Result};
use crate::models::EmbeddingVector;
use crate::provider::{with_retry, ProviderError, RetryPolicy};

#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::new(provider, config.batch_size, config.retry_policy()))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dimensionality every vector must have.
    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed `texts`, returning one vector per input in input order.
    ///
    /// Empty input returns an empty vector without calling the provider.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        self.embed_with_progress(texts, |_, _| {}).await
    }

    /// Like [`embed`](Self::embed), calling `on_batch(done, total)` after each batch.
    pub async fn embed_with_progress<F>(
        &self,
        texts: &[String],
        mut on_batch: F,
    ) -> Result<Vec<EmbeddingVector>>
    where
        F: FnMut(usize, usize),
    {
        let mut out = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let provider = &self.provider;
            let vectors = with_retry(&self.retry, "embed", move || provider.embed_batch(batch))
                .await
                .map_err(|e| KbError::EmbeddingService {
                    attempts: e.attempts,
                    source: e.last,
                })?;

            if vectors.len() != batch.len() {
                return Err(KbError::EmbeddingService {
                    attempts: 1,
                    source: ProviderError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    )),
                });
            }
            self.check_dims(&vectors, offset)?;

            debug!(batch = batch_no, size = batch.len(), "embedded batch");
            out.extend(vectors);
            on_batch(out.len(), texts.len());
        }
        Ok(out)
    }

    /// Embed a single query string.
    pub async fn embed_one(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| KbError::EmbeddingService {
            attempts: 1,
            source: ProviderError::InvalidResponse("no embedding returned".into()),
        })
    }

    fn check_dims(&self, vectors: &[EmbeddingVector], offset: usize) -> Result<()> {
        let expected = self.dims();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != expected {
                return Err(KbError::EmbeddingDimensionMismatch {
                    expected,
                    actual: v.len(),
                    position: offset + i,
                });
            }
        }
        Ok(())
    }
}
