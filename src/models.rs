//! Core data models used throughout the harness.
//!
//! These types represent the chunks, retrieval results, and answers that flow
//! through the ingestion and question-answering pipeline.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A token-bounded segment of the source document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position within one build.
    pub id: usize,
    pub text: String,
    pub token_count: usize,
    /// Byte range of `text` within the source document, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_offset: Option<Range<usize>>,
}

/// Fixed-length embedding of a chunk or query.
pub type EmbeddingVector = Vec<f32>;

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Inner product of unit vectors, in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Chunks ordered by descending similarity, at most `k` long.
pub type RetrievalResult = Vec<ScoredChunk>;

/// A generated answer plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Number of retrieved chunks that made it into the prompt.
    pub sources_count: usize,
    /// Ids of those chunks, in prompt order.
    pub source_ids: Vec<usize>,
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub chunks_indexed: usize,
    pub dims: usize,
    pub document_sha256: String,
    pub elapsed_ms: u64,
}
