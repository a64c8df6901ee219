//! Ingest progress reporting.
//!
//! Reports observable progress during `kbh ingest` so users see how far the
//! embedding phase has got and when the new index is live. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for an index rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestEvent {
    /// Source text was split into `chunks` chunks.
    Chunked { chunks: usize },
    /// `n` of `total` chunks have been embedded.
    Embedding { n: usize, total: usize },
    /// The new index is live.
    Published { chunks: usize },
}

/// Receives rebuild progress. Implementations write to stderr (human or JSON).
pub trait IngestProgress: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr: "ingest  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IngestProgress for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Chunked { chunks } => {
                format!("ingest  chunked  {} chunks\n", format_number(*chunks))
            }
            IngestEvent::Embedding { n, total } => format!(
                "ingest  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IngestEvent::Published { chunks } => {
                format!("ingest  published  {} chunks\n", format_number(*chunks))
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgress for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Chunked { chunks } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "chunks": chunks
            }),
            IngestEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestEvent::Published { chunks } => serde_json::json!({
                "event": "progress",
                "phase": "published",
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
