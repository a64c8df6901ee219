//! # kb-harness CLI (`kbh`)
//!
//! Builds the knowledge base from a document, queries it, and serves the
//! HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! kbh --config ./config/kbh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbh ingest [PATH]` | Extract, chunk, embed, and persist a document |
//! | `kbh search "<query>"` | Show the chunks closest to a query |
//! | `kbh ask "<question>"` | Answer a question from the indexed document |
//! | `kbh status` | Describe the persisted index |
//! | `kbh files` | List ingestible files in the data directory |
//! | `kbh serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `warn`,
//! `info` for `serve`). Command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kb_harness::progress::ProgressMode;
use kb_harness::{config, ingest, search, server, stats};

/// kb-harness: document-grounded question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbh",
    about = "kb-harness: ingest a document and answer questions grounded in it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from a document.
    ///
    /// Extracts text (PDF, TXT, MD, DOCX, PPTX, XLSX, CSV, JSON), splits it into
    /// overlapping token windows, embeds every chunk, and atomically replaces
    /// the persisted index. Without PATH the configured default document in
    /// the data directory is used.
    Ingest {
        /// Document to ingest.
        path: Option<PathBuf>,

        /// Extract and chunk only; report counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `off`, `human`, or `json`. Defaults to human on a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the chunks most similar to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question using only the indexed document.
    Ask { query: String },

    /// Describe the persisted index.
    Status,

    /// List supported files in the data directory (`*` marks the default).
    Files,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_progress(value: Option<&str>) -> anyhow::Result<ProgressMode> {
    match value {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => anyhow::bail!(
            "Unknown progress mode: '{}'. Must be off, human, or json.",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(match cli.command {
        Commands::Serve => "info",
        _ => "warn",
    });

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            path,
            dry_run,
            progress,
        } => {
            let mode = parse_progress(progress.as_deref())?;
            ingest::run_ingest(&cfg, path, dry_run, mode).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Ask { query } => {
            search::run_ask(&cfg, &query).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg)?;
        }
        Commands::Files => {
            stats::run_files(&cfg)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
