//! `kbh search` and `kbh ask` against the persisted index.

use anyhow::Result;

use crate::config::Config;
use crate::kb::KnowledgeBase;

fn open(config: &Config) -> Result<KnowledgeBase> {
    let kb = KnowledgeBase::from_config(config)?;
    if !kb.load_persisted()? {
        anyhow::bail!(
            "No index found in {}. Run `kbh ingest` first.",
            config.index.dir.display()
        );
    }
    Ok(kb)
}

/// Print the chunks most similar to `query`.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let kb = open(config)?;
    let k = k.unwrap_or_else(|| kb.top_k());
    let results = kb.retrieve(query, k).await?;

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] chunk {} ({} tokens)",
            i + 1,
            hit.score,
            hit.chunk.id,
            hit.chunk.token_count
        );
        let excerpt: String = hit.chunk.text.replace('\n', " ").chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!();
    }
    Ok(())
}

/// Answer `query` from the indexed document.
pub async fn run_ask(config: &Config, query: &str) -> Result<()> {
    let kb = open(config)?;
    let answer = kb.ask(query).await?;
    println!("{}", answer.text);
    println!();
    println!(
        "sources: {} (chunks {})",
        answer.sources_count,
        answer
            .source_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
