//! In-process embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that no network calls are made. The ONNX session is created lazily on the
//! first batch and reused for the life of the provider.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{KbError, Result};
use crate::provider::ProviderError;

pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    session: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, default_dims) = resolve_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(default_dims),
            session: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((M::MultilingualE5Base, 768)),
        other => Err(KbError::InvalidConfiguration(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let session = Arc::clone(&self.session);
        let model = self.model.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                let created = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    ProviderError::Rejected(format!("failed to initialize local model: {}", e))
                })?;
                *guard = Some(created);
            }
            match guard.as_mut() {
                Some(embedder) => embedder
                    .embed(texts, None)
                    .map_err(|e| ProviderError::InvalidResponse(format!("local embedding failed: {}", e))),
                None => Err(ProviderError::Unavailable("local model not initialized".into())),
            }
        })
        .await
        .map_err(|e| ProviderError::Unavailable(format!("embedding task panicked: {}", e)))?
    }
}
