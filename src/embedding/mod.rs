//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models locally via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! A provider performs exactly one request per call. Batching, retries, and
//! dimension checks are the job of [`Embedder`](crate::embedder::Embedder).
//!
//! Also provides vector utilities used by the index:
//! - [`l2_normalize`]: scale a vector to unit length in place
//! - [`dot`]: inner product
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{KbError, Result};
use crate::provider::{api_key_from_env, http_client, post_json, ProviderError};

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Calls `POST {url}/embeddings` with the configured model. The API key is
/// read from the environment variable named by `embedding.api_key_env`
/// (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if the API key variable is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            KbError::InvalidConfiguration("embedding.model required for OpenAI provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            KbError::InvalidConfiguration("embedding.dims required for OpenAI provider".into())
        })?;
        let api_key = api_key_from_env(&config.api_key_env)
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = http_client(config.timeout())
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            "OpenAI",
            &format!("{}/embeddings", self.url),
            Some(&self.api_key),
            &body,
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by each item's `index`.
fn parse_openai_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, json_to_vec(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            KbError::InvalidConfiguration("embedding.model required for Ollama provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            KbError::InvalidConfiguration("embedding.dims required for Ollama provider".into())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = http_client(config.timeout())
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/embed", self.url),
            None,
            &body,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing embeddings array".into()))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                ProviderError::InvalidResponse("embedding is not an array".into())
            })?;
            json_to_vec(values)
        })
        .collect()
}

fn json_to_vec(values: &[serde_json::Value]) -> std::result::Result<Vec<f32>, ProviderError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::InvalidResponse("non-numeric embedding value".into()))
        })
        .collect()
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(KbError::InvalidConfiguration(
            "Local embedding provider requires --features local-embeddings-fastembed".into(),
        )),
        other => Err(KbError::InvalidConfiguration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float slice as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use kb_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing bytes short of 4 are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
