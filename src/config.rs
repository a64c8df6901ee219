//! TOML configuration.
//!
//! Every section except `[chunking]` has defaults, so a minimal file only
//! needs chunk sizes. API keys are never stored in the file; providers read
//! them from the environment variable named by `api_key_env`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::ChunkingParams;
use crate::provider::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `vectors.bin` and `chunks.json`.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Directory the server lists and ingests files from.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File ingested by `POST /ingest` and `kbh ingest` without a path.
    #[serde(default = "default_file")]
    pub default_file: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_file: default_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_file() -> String {
    "knowledge.pdf".to_string()
}

impl DocumentsConfig {
    pub fn default_path(&self) -> PathBuf {
        self.data_dir.join(&self.default_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_overlap() -> usize {
    80
}
fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}

impl ChunkingConfig {
    pub fn params(&self) -> crate::error::Result<ChunkingParams> {
        ChunkingParams::new(self.chunk_tokens, self.overlap_tokens)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the service (provider-specific default when unset).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API (Groq when unset).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_chat_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Tokens reserved for the answer; also sent as `max_tokens`.
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: usize,
    /// Model input limit; the prompt must fit in `context_window - max_answer_tokens`.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Overrides the built-in grounding instructions. Must contain `{context}`.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            url: None,
            api_key_env: default_chat_key_env(),
            temperature: default_temperature(),
            max_answer_tokens: default_max_answer_tokens(),
            context_window: default_context_window(),
            system_prompt: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_chat_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_answer_tokens() -> usize {
    500
}
fn default_context_window() -> usize {
    8192
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Tokens available to system instructions, context, and query.
    pub fn prompt_budget(&self) -> usize {
        self.context_window.saturating_sub(self.max_answer_tokens)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Upper bound on the embedding phase of a rebuild.
    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ingest_timeout_secs(),
        }
    }
}

fn default_ingest_timeout_secs() -> u64 {
    600
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Defaults with the chunk sizes the harness was tuned with (450 / 80).
    pub fn minimal() -> Self {
        Self {
            index: IndexConfig::default(),
            documents: DocumentsConfig::default(),
            chunking: ChunkingConfig {
                chunk_tokens: 450,
                overlap_tokens: default_overlap(),
                tokenizer: default_tokenizer(),
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    config
        .chunking
        .params()
        .with_context(|| "invalid [chunking] section")?;
    match config.chunking.tokenizer.as_str() {
        "cl100k_base" | "whitespace" => {}
        other => bail!(
            "Unknown tokenizer: '{}'. Must be cl100k_base or whitespace.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if emb.is_enabled() {
        // Local models know their own width; remote ones must be told
        let dims_required = emb.provider != "local";
        if emb.dims == Some(0) || (dims_required && emb.dims.is_none()) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                emb.provider
            );
        }
        if emb.model.is_none() && emb.provider != "local" {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                emb.provider
            );
        }
    }
    if emb.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if emb.backoff_base_ms > emb.backoff_max_ms {
        bail!("embedding.backoff_base_ms must be <= embedding.backoff_max_ms");
    }

    // Validate generation
    let gen = &config.generation;
    match gen.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if gen.max_answer_tokens >= gen.context_window {
        bail!("generation.max_answer_tokens must be < generation.context_window");
    }
    if !(0.0..=2.0).contains(&gen.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if let Some(prompt) = &gen.system_prompt {
        if !prompt.contains("{context}") {
            bail!("generation.system_prompt must contain a {{context}} placeholder");
        }
    }
    if gen.backoff_base_ms > gen.backoff_max_ms {
        bail!("generation.backoff_base_ms must be <= generation.backoff_max_ms");
    }

    if config.ingest.timeout_secs == 0 {
        bail!("ingest.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[chunking]
chunk_tokens = 450
"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.overlap_tokens, 80);
        assert_eq!(cfg.chunking.tokenizer, "cl100k_base");
        assert_eq!(cfg.retrieval.top_k, 4);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.generation.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.generation.prompt_budget(), 8192 - 500);
        assert_eq!(cfg.documents.default_path(), PathBuf::from("./data/knowledge.pdf"));
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let err = parse_config("[chunking]\nchunk_tokens = 80\noverlap_tokens = 80\n").unwrap_err();
        assert!(format!("{:#}", err).contains("overlap_tokens"));
    }

    #[test]
    fn negative_overlap_rejected_at_parse() {
        assert!(parse_config("[chunking]\nchunk_tokens = 80\noverlap_tokens = -1\n").is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        let toml = format!("{}\n[retrieval]\ntop_k = 0\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn enabled_embedding_requires_dims_and_model() {
        let toml = format!("{}\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!("{}\n[embedding]\nprovider = \"openai\"\ndims = 8\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
            MINIMAL
        );
        let cfg = parse_config(&toml).unwrap();
        assert_eq!(cfg.embedding.retry_policy().max_retries, 5);
    }

    #[test]
    fn local_embedding_dims_are_optional_but_not_zero() {
        let toml = format!("{}\n[embedding]\nprovider = \"local\"\n", MINIMAL);
        let cfg = parse_config(&toml).unwrap();
        assert!(cfg.embedding.dims.is_none());
        assert!(cfg.embedding.model.is_none());

        let toml = format!("{}\n[embedding]\nprovider = \"local\"\ndims = 0\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!("{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn unknown_providers_rejected() {
        let toml = format!("{}\n[embedding]\nprovider = \"cohere\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!("{}\n[generation]\nprovider = \"anthropic\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn system_prompt_needs_placeholder() {
        let toml = format!(
            "{}\n[generation]\nsystem_prompt = \"Answer briefly.\"\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn answer_budget_must_fit_window() {
        let toml = format!(
            "{}\n[generation]\ncontext_window = 500\nmax_answer_tokens = 500\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn minimal_config_is_valid() {
        validate(&Config::minimal()).unwrap();
    }
}
