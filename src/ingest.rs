//! `kbh ingest`: extract a document and rebuild the index from it.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::extract::extract_file;
use crate::kb::KnowledgeBase;
use crate::progress::ProgressMode;
use crate::tokenizer::create_tokenizer;

pub async fn run_ingest(
    config: &Config,
    path: Option<PathBuf>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let path = path.unwrap_or_else(|| config.documents.default_path());
    let text = extract_file(&path)
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;

    if dry_run {
        let tokenizer = create_tokenizer(&config.chunking.tokenizer)?;
        let chunks = chunk_text(tokenizer.as_ref(), &text, config.chunking.params()?);
        println!("ingest {} (dry-run)", path.display());
        println!("  characters: {}", text.chars().count());
        println!("  tokens: {}", tokenizer.count_tokens(&text));
        println!(
            "  chunks: {} ({} tokens, {} overlap)",
            chunks.len(),
            config.chunking.chunk_tokens,
            config.chunking.overlap_tokens
        );
        return Ok(());
    }

    let kb = KnowledgeBase::from_config(config)?;
    let reporter = progress.reporter();
    let report = kb.rebuild(&text, reporter.as_ref()).await?;

    println!("ingest {}", path.display());
    println!("  chunks indexed: {}", report.chunks_indexed);
    println!("  dims: {}", report.dims);
    println!("  sha256: {}", report.document_sha256);
    println!("  index: {}", config.index.dir.display());
    println!("  elapsed: {} ms", report.elapsed_ms);
    println!("ok");
    Ok(())
}
