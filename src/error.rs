//! Error taxonomy for the retrieval pipeline.
//!
//! Library code returns [`KbError`]; the CLI and config loader wrap it in
//! `anyhow` with context. Each variant knows which pipeline [`Stage`] it came
//! from so frontends can report a precise message instead of a generic failure.

use thiserror::Error;

use crate::provider::ProviderError;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Extraction,
    Embedding,
    Index,
    Retrieval,
    Generation,
    Ingest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Extraction => "extraction",
            Stage::Embedding => "embedding",
            Stage::Index => "index",
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
            Stage::Ingest => "ingest",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum KbError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid k: {0} (must be >= 1)")]
    InvalidK(usize),

    #[error("query must not be empty")]
    EmptyQuery,

    #[error(
        "embedding service returned a {actual}-dim vector at position {position}, expected {expected}; \
         check embedding.dims against the configured model"
    )]
    EmbeddingDimensionMismatch {
        expected: usize,
        actual: usize,
        position: usize,
    },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error(
        "persisted index has {stored}-dim vectors but the embedding model produces {expected}; \
         rebuild the index or reconfigure embedding.dims"
    )]
    IncompatibleDimension { stored: usize, expected: usize },

    #[error("embedding service failed after {attempts} attempt(s): {source}")]
    EmbeddingService {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("generation service failed after {attempts} attempt(s): {source}")]
    GenerationService {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("index is empty: the last ingest produced no chunks")]
    EmptyIndex,

    #[error("knowledge base not ready: run ingest first")]
    KnowledgeBaseNotReady,

    #[error("corrupt index: {0}; rebuild it from the source document")]
    CorruptIndex(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("ingest timed out after {0}s; previous index left in place")]
    IngestTimeout(u64),

    #[error("prompt needs {needed} tokens but the budget is {budget}")]
    ContextBudgetExceeded { needed: usize, budget: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl KbError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        KbError::Io {
            context: context.into(),
            source,
        }
    }

    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            KbError::InvalidConfiguration(_) => Stage::Config,
            KbError::InvalidK(_) | KbError::EmptyQuery => Stage::Retrieval,
            KbError::EmbeddingDimensionMismatch { .. } | KbError::EmbeddingService { .. } => {
                Stage::Embedding
            }
            KbError::DimensionMismatch(_)
            | KbError::IncompatibleDimension { .. }
            | KbError::CorruptIndex(_)
            | KbError::Io { .. } => Stage::Index,
            KbError::EmptyIndex | KbError::KnowledgeBaseNotReady => Stage::Retrieval,
            KbError::GenerationService { .. } | KbError::ContextBudgetExceeded { .. } => {
                Stage::Generation
            }
            KbError::Extraction(_) => Stage::Extraction,
            KbError::IngestTimeout(_) => Stage::Ingest,
        }
    }

    /// True for the expected precondition failure before the first ingest.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, KbError::EmptyIndex | KbError::KnowledgeBaseNotReady)
    }

    /// True when an external service failed after exhausting retries.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            KbError::EmbeddingService { .. } | KbError::GenerationService { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KbError>;
