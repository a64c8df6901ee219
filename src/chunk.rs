//! Token-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_tokens` tokens.
//! Consecutive windows start `chunk_tokens - overlap_tokens` tokens apart, so
//! neighbours share exactly `overlap_tokens` tokens. Iteration stops at the
//! first window that reaches the end of the token stream, which gives
//! `ceil((N - overlap) / (chunk - overlap))` chunks for `N > overlap` tokens.
//!
//! Each chunk's text is the exact slice of the source covering its tokens, and
//! its id is its position, so the same input always yields the same chunks.

use crate::error::{KbError, Result};
use crate::models::Chunk;
use crate::tokenizer::Tokenizer;

/// Validated window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    chunk_tokens: usize,
    overlap_tokens: usize,
}

impl ChunkingParams {
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if chunk_tokens == 0 {
            return Err(KbError::InvalidConfiguration(
                "chunk_tokens must be > 0".to_string(),
            ));
        }
        if overlap_tokens >= chunk_tokens {
            return Err(KbError::InvalidConfiguration(format!(
                "overlap_tokens ({}) must be < chunk_tokens ({})",
                overlap_tokens, chunk_tokens
            )));
        }
        Ok(Self {
            chunk_tokens,
            overlap_tokens,
        })
    }

    pub fn chunk_tokens(&self) -> usize {
        self.chunk_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    fn stride(&self) -> usize {
        self.chunk_tokens - self.overlap_tokens
    }
}

/// Split text into overlapping token windows.
///
/// Returns an empty vector for text with no tokens.
pub fn chunk_text(tokenizer: &dyn Tokenizer, text: &str, params: ChunkingParams) -> Vec<Chunk> {
    let spans = tokenizer.token_spans(text);
    let total = spans.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let end = (start + params.chunk_tokens).min(total);
        let byte_start = spans[start].start;
        let byte_end = spans[end - 1].end;

        // Windows made only of zero-width tokens carry no text
        if byte_end > byte_start {
            chunks.push(Chunk {
                id: chunks.len(),
                text: text[byte_start..byte_end].to_string(),
                token_count: end - start,
                source_offset: Some(byte_start..byte_end),
            });
        }

        if end == total {
            break;
        }
        start += params.stride();
    }

    chunks
}

/// Validate raw parameters and chunk in one step.
pub fn chunk(
    tokenizer: &dyn Tokenizer,
    text: &str,
    chunk_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>> {
    let params = ChunkingParams::new(chunk_tokens, overlap_tokens)?;
    Ok(chunk_text(tokenizer, text, params))
}

/// Number of chunks [`chunk_text`] produces for `n_tokens` tokens.
pub fn expected_chunk_count(n_tokens: usize, params: ChunkingParams) -> usize {
    if n_tokens == 0 {
        return 0;
    }
    if n_tokens <= params.overlap_tokens {
        return 1;
    }
    (n_tokens - params.overlap_tokens).div_ceil(params.stride())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{Cl100kTokenizer, WhitespaceTokenizer};

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn params(chunk: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams::new(chunk, overlap).unwrap()
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(matches!(
            ChunkingParams::new(0, 0),
            Err(KbError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ChunkingParams::new(10, 10),
            Err(KbError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ChunkingParams::new(10, 11),
            Err(KbError::InvalidConfiguration(_))
        ));
        assert!(ChunkingParams::new(10, 9).is_ok());
        assert!(ChunkingParams::new(1, 0).is_ok());
        assert!(chunk(&WhitespaceTokenizer, "some text", 4, 4).is_err());
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text(&WhitespaceTokenizer, "", params(5, 1)).is_empty());
        assert!(chunk_text(&WhitespaceTokenizer, "  \n ", params(5, 1)).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text(&WhitespaceTokenizer, "Hello, world!", params(450, 80));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].token_count, 2);
        assert_eq!(chunks[0].source_offset, Some(0..13));
    }

    #[test]
    fn test_boundary_arithmetic_1000_tokens() {
        let text = words(1000);
        let p = params(450, 80);
        let chunks = chunk_text(&WhitespaceTokenizer, &text, p);
        // ceil((1000 - 80) / (450 - 80)) = ceil(2.486) = 3
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.len(), expected_chunk_count(1000, p));
        assert_eq!(chunks[0].token_count, 450);
        assert_eq!(chunks[1].token_count, 450);
        assert_eq!(chunks[2].token_count, 260);
        assert!(chunks[1].text.starts_with("w370 "));
        assert!(chunks[2].text.starts_with("w740 "));
        assert!(chunks[2].text.ends_with("w999"));
    }

    #[test]
    fn test_no_redundant_tail_window() {
        // Exactly one window: the overlap tail is already covered
        let chunks = chunk_text(&WhitespaceTokenizer, &words(450), params(450, 80));
        assert_eq!(chunks.len(), 1);
        let chunks = chunk_text(&WhitespaceTokenizer, &words(451), params(450, 80));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].token_count, 81);
    }

    #[test]
    fn test_counts_and_overlap_hold_across_params() {
        for n in [1usize, 7, 20, 63, 100] {
            for (chunk, overlap) in [(5, 0), (5, 2), (8, 7), (10, 3), (1, 0)] {
                let p = params(chunk, overlap);
                let text = words(n);
                let chunks = chunk_text(&WhitespaceTokenizer, &text, p);
                assert_eq!(chunks.len(), expected_chunk_count(n, p), "n={} p={:?}", n, p);

                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.id, i);
                    assert!(c.token_count <= chunk);
                    assert!(c.token_count > 0);
                }
                for pair in chunks.windows(2) {
                    let a: Vec<&str> = pair[0].text.split_whitespace().collect();
                    let b: Vec<&str> = pair[1].text.split_whitespace().collect();
                    assert_eq!(a.len(), chunk, "only the final chunk may be short");
                    assert_eq!(&a[a.len() - overlap..], &b[..overlap]);
                }
            }
        }
    }

    #[test]
    fn test_chunk_text_matches_source_offset() {
        let text = "Alpha beta.\n\nGamma delta epsilon.\nZeta eta theta iota.";
        for c in chunk_text(&WhitespaceTokenizer, text, params(3, 1)) {
            let range = c.source_offset.clone().unwrap();
            assert_eq!(&text[range], c.text);
        }
    }

    #[test]
    fn test_deterministic() {
        let tok = Cl100kTokenizer::new().unwrap();
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta ".repeat(40);
        let c1 = chunk_text(&tok, &text, params(25, 5));
        let c2 = chunk_text(&tok, &text, params(25, 5));
        assert!(c1.len() > 1);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_cl100k_windows_respect_token_limit() {
        let tok = Cl100kTokenizer::new().unwrap();
        let text = "Standard homeowners insurance typically covers dwelling coverage, \
                    personal property, liability protection, and additional living expenses. "
            .repeat(20);
        let p = params(40, 8);
        let chunks = chunk_text(&tok, &text, p);
        assert_eq!(chunks.len(), expected_chunk_count(tok.count_tokens(&text), p));
        for c in &chunks {
            assert!(c.token_count <= 40);
        }
    }
}
