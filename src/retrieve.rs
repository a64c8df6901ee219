//! Query-time retrieval: embed the query, search one index snapshot.

use std::sync::Arc;

use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{KbError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Return the `k` chunks of `snapshot` most similar to `query`.
///
/// `snapshot` is the index captured at the start of the request; `None` means
/// nothing has been ingested yet. Argument checks run before any provider call.
pub async fn retrieve(
    snapshot: Option<Arc<VectorIndex>>,
    embedder: &Embedder,
    query: &str,
    k: usize,
) -> Result<RetrievalResult> {
    if k == 0 {
        return Err(KbError::InvalidK(k));
    }
    if query.trim().is_empty() {
        return Err(KbError::EmptyQuery);
    }
    let index = snapshot.ok_or(KbError::KnowledgeBaseNotReady)?;
    if index.is_empty() {
        return Err(KbError::EmptyIndex);
    }

    let query_vec = embedder.embed_one(query).await?;
    let results = index.search(&query_vec, k)?;
    debug!(k, returned = results.len(), "retrieved chunks");
    Ok(results)
}
