//! # kb-harness
//!
//! Document-grounded question answering over a single knowledge document.
//!
//! A document is extracted to plain text, split into overlapping
//! token-bounded chunks, embedded, and stored in an inner-product vector
//! index. Questions are embedded the same way; the closest chunks are packed
//! into a grounded prompt and sent to a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │  Extract  │──▶│  Chunk  │──▶│  Embed   │──▶│ VectorIndex │──▶ persist
//! │ PDF/DOCX… │   │ tokens  │   │ batched  │   │ normalized  │
//! └───────────┘   └─────────┘   └──────────┘   └──────┬──────┘
//!                                                     │ publish (Arc swap)
//!                      ┌──────────────────────────────┤
//!                      ▼                              ▼
//!                 ┌──────────┐   retrieve top-k  ┌──────────┐
//!                 │   CLI    │◀─────────────────▶│   HTTP   │
//!                 │  (kbh)   │   answer (LLM)    │  (axum)  │
//!                 └──────────┘                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbh ingest ./data/knowledge.pdf     # build and persist the index
//! kbh search "flood damage"           # show the closest chunks
//! kbh ask "Is flood damage covered?"  # grounded answer
//! kbh serve                           # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and pipeline stages |
//! | [`models`] | Core data types |
//! | [`tokenizer`] | Token counting (`cl100k_base`, whitespace) |
//! | [`chunk`] | Token-window chunking |
//! | [`provider`] | HTTP plumbing and retry policy shared by providers |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embedder`] | Batched, retrying, dimension-checked embedding |
//! | [`index`] | Vector index and persistence |
//! | [`retrieve`] | Query-time retrieval |
//! | [`generation`] | Chat-completion providers |
//! | [`answer`] | Budgeted prompt assembly and answer generation |
//! | [`kb`] | Shared knowledge base: rebuild, publish, query |
//! | [`extract`] | Multi-format text extraction |
//! | [`progress`] | Ingest progress reporting |
//! | [`server`] | HTTP API |
//! | [`ingest`], [`search`], [`stats`] | `kbh` subcommands |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod kb;
pub mod models;
pub mod progress;
pub mod provider;
pub mod retrieve;
pub mod search;
pub mod server;
pub mod stats;
pub mod tokenizer;
