//! `kbh status` and `kbh files`.
//!
//! Both read only what is on disk, so they work without provider credentials.

use anyhow::Result;

use crate::config::Config;
use crate::extract::list_supported_files;
use crate::index::VectorIndex;

pub fn run_status(config: &Config) -> Result<()> {
    let dir = &config.index.dir;
    println!("kbh index status");
    println!("================");
    println!();
    println!("  Index dir:   {}", dir.display());

    if !VectorIndex::exists(dir) {
        println!("  State:       not built (run `kbh ingest`)");
        return Ok(());
    }

    let (manifest, chunks) = VectorIndex::read_manifest(dir)?;
    println!("  State:       {}", if chunks > 0 { "ready" } else { "empty" });
    println!("  Chunks:      {}", chunks);
    println!("  Model:       {} ({} dims)", manifest.model, manifest.dims);
    println!(
        "  Chunking:    {} tokens, {} overlap, {}",
        manifest.chunk_tokens, manifest.overlap_tokens, manifest.tokenizer
    );
    println!("  Document:    sha256 {}", manifest.document_sha256);
    println!(
        "  Built:       {}",
        manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Some(dims) = config.embedding.dims {
        if dims != manifest.dims {
            println!();
            println!(
                "  warning: embedding.dims is {} but the index has {}; re-run `kbh ingest`",
                dims, manifest.dims
            );
        }
    }
    Ok(())
}

pub fn run_files(config: &Config) -> Result<()> {
    let files = list_supported_files(&config.documents.data_dir)?;
    if files.is_empty() {
        println!(
            "No supported files in {}.",
            config.documents.data_dir.display()
        );
        return Ok(());
    }
    for name in files {
        let marker = if name == config.documents.default_file {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, name);
    }
    Ok(())
}
