//! Immutable inner-product vector index with on-disk persistence.
//!
//! A [`VectorIndex`] owns an ordered list of chunks and a row-major matrix of
//! L2-normalized vectors, so inner product equals cosine similarity. It is
//! built once from a complete set of embeddings and never mutated; a rebuild
//! produces a new index that replaces the old one wholesale.
//!
//! # Persisted layout
//!
//! Two files in the index directory:
//!
//! ```text
//! vectors.bin   "KBVI" | version u32 | dims u32 | count u64 | count × dims f32 (LE)
//! chunks.json   { "manifest": {...}, "vectors_sha256": "...", "chunks": [ {id, text, ...}, ... ] }
//! ```
//!
//! Both are written to a `.tmp` sibling and renamed into place. The renames are
//! two steps, so `chunks.json` records the SHA-256 of the `vectors.bin` it was
//! written with; `load` checks that hash and the headers, and reports any
//! disagreement as [`KbError::CorruptIndex`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, dot, l2_normalize, vec_to_blob};
use crate::error::{KbError, Result};
use crate::models::{Chunk, EmbeddingVector, RetrievalResult, ScoredChunk};

const MAGIC: &[u8; 4] = b"KBVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.json";

/// Build provenance stored next to the chunk records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model: String,
    pub dims: usize,
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub tokenizer: String,
    /// SHA-256 of the extracted source text, hex encoded.
    pub document_sha256: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ChunksFile {
    manifest: IndexManifest,
    /// Hex SHA-256 of the whole `vectors.bin` written alongside.
    vectors_sha256: String,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from chunks and their embeddings, normalizing each row.
    ///
    /// `chunks[i]` must correspond to `vectors[i]` and carry id `i`, and every
    /// vector must have exactly `dims` components.
    pub fn build(dims: usize, chunks: Vec<Chunk>, vectors: Vec<EmbeddingVector>) -> Result<Self> {
        if dims == 0 {
            return Err(KbError::DimensionMismatch(
                "index dimensionality must be > 0".into(),
            ));
        }
        if let Some(pos) = first_out_of_sequence(&chunks) {
            return Err(KbError::InvalidConfiguration(format!(
                "chunk at position {} has id {}; ids must be 0..n in order",
                pos, chunks[pos].id
            )));
        }
        if chunks.len() != vectors.len() {
            return Err(KbError::DimensionMismatch(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for (i, mut v) in vectors.into_iter().enumerate() {
            if v.len() != dims {
                return Err(KbError::DimensionMismatch(format!(
                    "vector {} has {} dims, expected {}",
                    i,
                    v.len(),
                    dims
                )));
            }
            l2_normalize(&mut v);
            flat.extend_from_slice(&v);
        }

        Ok(Self {
            dims,
            chunks,
            vectors: flat,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The stored (unit-length) vector of chunk `i`, if it exists.
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        (i < self.len()).then(|| self.row(i))
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dims..(i + 1) * self.dims]
    }

    /// Return the `min(k, len)` chunks most similar to `query`.
    ///
    /// Results are ordered by descending score; equal scores are ordered by
    /// ascending chunk id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(KbError::InvalidK(k));
        }
        if self.is_empty() {
            return Err(KbError::EmptyIndex);
        }
        if query.len() != self.dims {
            return Err(KbError::DimensionMismatch(format!(
                "query has {} dims, index has {}",
                query.len(),
                self.dims
            )));
        }

        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| (i, dot(&q, self.row(i))))
            .collect();
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.chunks[a.0].id.cmp(&self.chunks[b.0].id))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// True when both index files exist in `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(VECTORS_FILE).is_file() && dir.join(CHUNKS_FILE).is_file()
    }

    /// Read only the manifest and chunk count, without loading vectors.
    pub fn read_manifest(dir: &Path) -> Result<(IndexManifest, usize)> {
        let chunks_path = dir.join(CHUNKS_FILE);
        let bytes = fs::read(&chunks_path)
            .map_err(|e| KbError::io(format!("reading {}", chunks_path.display()), e))?;
        let meta: ChunksFile = serde_json::from_slice(&bytes)
            .map_err(|e| KbError::CorruptIndex(format!("unreadable {}: {}", CHUNKS_FILE, e)))?;
        Ok((meta.manifest, meta.chunks.len()))
    }

    /// Write the index and its manifest to `dir`, creating it if needed.
    pub fn save(&self, dir: &Path, manifest: &IndexManifest) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| KbError::io(format!("creating {}", dir.display()), e))?;

        let mut bin = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bin.extend_from_slice(MAGIC);
        bin.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bin.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bin.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bin.extend_from_slice(&vec_to_blob(&self.vectors));

        let meta = ChunksFile {
            manifest: manifest.clone(),
            vectors_sha256: hex::encode(Sha256::digest(&bin)),
            chunks: self.chunks.clone(),
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| KbError::CorruptIndex(format!("serializing chunk metadata: {}", e)))?;

        write_atomic(&dir.join(VECTORS_FILE), &bin)?;
        write_atomic(&dir.join(CHUNKS_FILE), &json)?;
        Ok(())
    }

    /// Load a persisted index, checking it against the configured dimensionality.
    pub fn load(dir: &Path, expected_dims: usize) -> Result<(Self, IndexManifest)> {
        let vectors_path = dir.join(VECTORS_FILE);
        let chunks_path = dir.join(CHUNKS_FILE);

        let bin = fs::read(&vectors_path)
            .map_err(|e| KbError::io(format!("reading {}", vectors_path.display()), e))?;
        let meta_bytes = fs::read(&chunks_path)
            .map_err(|e| KbError::io(format!("reading {}", chunks_path.display()), e))?;

        if bin.len() < HEADER_LEN {
            return Err(KbError::CorruptIndex(format!(
                "{} is truncated ({} bytes)",
                VECTORS_FILE,
                bin.len()
            )));
        }
        if &bin[0..4] != MAGIC {
            return Err(KbError::CorruptIndex(format!("{} has bad magic", VECTORS_FILE)));
        }
        let version = read_u32(&bin[4..8]);
        if version != FORMAT_VERSION {
            return Err(KbError::CorruptIndex(format!(
                "unsupported {} version {}",
                VECTORS_FILE, version
            )));
        }
        let dims = read_u32(&bin[8..12]) as usize;
        let count = u64::from_le_bytes([
            bin[12], bin[13], bin[14], bin[15], bin[16], bin[17], bin[18], bin[19],
        ]) as usize;

        let expected_payload = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| KbError::CorruptIndex("vector header overflows".into()))?;
        let payload = &bin[HEADER_LEN..];
        if payload.len() != expected_payload {
            return Err(KbError::CorruptIndex(format!(
                "expected {} bytes of vectors for {} × {}, found {}",
                expected_payload,
                count,
                dims,
                payload.len()
            )));
        }

        let meta: ChunksFile = serde_json::from_slice(&meta_bytes)
            .map_err(|e| KbError::CorruptIndex(format!("unreadable {}: {}", CHUNKS_FILE, e)))?;

        // A save interrupted between the two renames leaves files from different builds
        if meta.vectors_sha256 != hex::encode(Sha256::digest(&bin)) {
            return Err(KbError::CorruptIndex(format!(
                "{} was not written with this {}",
                CHUNKS_FILE, VECTORS_FILE
            )));
        }
        if meta.chunks.len() != count {
            return Err(KbError::CorruptIndex(format!(
                "{} has {} chunks but {} has {} vectors",
                CHUNKS_FILE,
                meta.chunks.len(),
                VECTORS_FILE,
                count
            )));
        }
        if meta.manifest.dims != dims {
            return Err(KbError::CorruptIndex(format!(
                "manifest says {} dims, vectors have {}",
                meta.manifest.dims, dims
            )));
        }
        if let Some(pos) = first_out_of_sequence(&meta.chunks) {
            return Err(KbError::CorruptIndex(format!(
                "chunk at position {} has id {}",
                pos, meta.chunks[pos].id
            )));
        }
        if dims != expected_dims {
            return Err(KbError::IncompatibleDimension {
                stored: dims,
                expected: expected_dims,
            });
        }

        let index = Self {
            dims,
            chunks: meta.chunks,
            vectors: blob_to_vec(payload),
        };
        Ok((index, meta.manifest))
    }
}

fn first_out_of_sequence(chunks: &[Chunk]) -> Option<usize> {
    chunks.iter().enumerate().position(|(i, c)| c.id != i)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.set_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let mut file = fs::File::create(&tmp)
        .map_err(|e| KbError::io(format!("creating {}", tmp.display()), e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| KbError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .map_err(|e| KbError::io(format!("renaming {}", tmp.display()), e))?;
    Ok(())
}
