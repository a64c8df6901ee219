//! Token counting behind a swappable [`Tokenizer`] trait.
//!
//! Chunk sizes and the prompt budget are measured in model tokens, not
//! characters. The default [`Cl100kTokenizer`] uses the `cl100k_base` BPE
//! shared by the OpenAI embedding and chat models; [`WhitespaceTokenizer`] is a
//! dependency-free alternative selected with `chunking.tokenizer = "whitespace"`.

use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

use crate::error::{KbError, Result};

pub trait Tokenizer: Send + Sync {
    /// Identifier recorded in the index manifest.
    fn name(&self) -> &str;

    /// Byte range of every token in `text`, in order.
    ///
    /// Ranges are non-overlapping, increasing, and always fall on UTF-8
    /// character boundaries. A token that encodes only part of a character
    /// gets an empty range; the character is attributed to the token that
    /// completes it.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count_tokens(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

/// `cl100k_base` byte-pair encoding via `tiktoken-rs`.
pub struct Cl100kTokenizer {
    bpe: &'static CoreBPE,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        static BPE: OnceCell<CoreBPE> = OnceCell::new();
        let bpe = BPE.get_or_try_init(tiktoken_rs::cl100k_base).map_err(|e| {
            KbError::InvalidConfiguration(format!("failed to load cl100k_base encoding: {}", e))
        })?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let tokens = self.bpe.encode_ordinary(text);
        let mut spans = Vec::with_capacity(tokens.len());
        let mut pos = 0usize;
        let mut pending: Vec<usize> = Vec::new();

        for token in tokens {
            pending.push(token);
            // Multi-byte characters can straddle tokens; decode only once the
            // pending group forms valid UTF-8.
            if let Ok(piece) = self.bpe.decode(pending.clone()) {
                let end = (pos + piece.len()).min(text.len());
                for _ in 1..pending.len() {
                    spans.push(pos..pos);
                }
                spans.push(pos..end);
                pos = end;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            for _ in 1..pending.len() {
                spans.push(pos..pos);
            }
            spans.push(pos..text.len());
        }

        spans
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Treats each run of non-whitespace characters as one token.
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start: Option<usize> = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push(s..i);
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(s..text.len());
        }
        spans
    }
}

/// Create the tokenizer named in config (`cl100k_base` or `whitespace`).
pub fn create_tokenizer(name: &str) -> Result<Arc<dyn Tokenizer>> {
    match name {
        "cl100k_base" => Ok(Arc::new(Cl100kTokenizer::new()?)),
        "whitespace" => Ok(Arc::new(WhitespaceTokenizer)),
        other => Err(KbError::InvalidConfiguration(format!(
            "unknown tokenizer '{}'; expected cl100k_base or whitespace",
            other
        ))),
    }
}
