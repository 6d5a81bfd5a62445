//! Sliding-window text chunker.
//!
//! Splits retained document text into overlapping fixed-size windows. Sizes
//! and offsets are measured in characters, never bytes, so multi-byte text
//! chunks the same way as ASCII.
//!
//! # Algorithm
//!
//! 1. Place a window of `chunk_chars` characters at offset 0.
//! 2. Advance the window start by `chunk_chars - overlap_chars` each step.
//! 3. The final window may be shorter; it is emitted only if it contains
//!    non-whitespace.
//! 4. Windows consisting only of whitespace are skipped.
//!
//! Each chunk gets a deterministic UUIDv5 derived from its document ID and
//! ordinal, so re-ingesting a document overwrites rather than duplicates.
//!
//! # Example
//!
//! ```rust
//! use luminary_index::chunk::{split, ChunkParams};
//!
//! let text = "a".repeat(1200);
//! let params = ChunkParams::new(500, 100).unwrap();
//! let spans: Vec<(usize, usize)> = split(&text, params).map(|s| (s.start, s.end)).collect();
//! assert_eq!(spans, vec![(0, 500), (400, 900), (800, 1200)]);
//! ```

use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, RetrievalError};
use crate::models::Chunk;

/// Namespace for chunk identifiers.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6c75_6d69_6e61_7279_8a1d_3c0e_52f4_b917);

/// Window parameters. `overlap_chars < chunk_chars` is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_chars: usize,
    overlap_chars: usize,
}

impl ChunkParams {
    pub fn new(chunk_chars: usize, overlap_chars: usize) -> Result<Self> {
        if chunk_chars == 0 {
            return Err(RetrievalError::InvalidInput(
                "chunk length must be > 0".to_string(),
            ));
        }
        if overlap_chars >= chunk_chars {
            return Err(RetrievalError::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk length ({})",
                overlap_chars, chunk_chars
            )));
        }
        Ok(Self {
            chunk_chars,
            overlap_chars,
        })
    }

    pub fn chunk_chars(&self) -> usize {
        self.chunk_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    fn step(&self) -> usize {
        self.chunk_chars - self.overlap_chars
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_chars: 500,
            overlap_chars: 100,
        }
    }
}

/// One window over the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Iterator over the windows of a text.
///
/// Cloning restarts nothing and shares the char-offset table, so a clone
/// taken before iteration replays the identical sequence.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    offsets: Arc<[usize]>,
    params: ChunkParams,
    next_start: usize,
    done: bool,
}

impl<'a> Windows<'a> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        loop {
            if self.done || self.next_start >= self.char_len() {
                return None;
            }
            let start = self.next_start;
            let end = (start + self.params.chunk_chars).min(self.char_len());
            if end >= self.char_len() {
                self.done = true;
            } else {
                self.next_start = start + self.params.step();
            }

            let slice = &self.text[self.offsets[start]..self.offsets[end]];
            if slice.trim().is_empty() {
                continue;
            }
            return Some(Span {
                text: slice,
                start,
                end,
            });
        }
    }
}

/// Split `text` into overlapping windows.
pub fn split(text: &str, params: ChunkParams) -> Windows<'_> {
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    Windows {
        text,
        offsets: offsets.into(),
        params,
        next_start: 0,
        done: false,
    }
}

/// Deterministic chunk identifier for `(document_id, ordinal)`.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let name = format!("{}:{}", document_id, ordinal);
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

/// Chunk a document's retained text into [`Chunk`]s with contiguous ordinals.
///
/// Returns an empty vector for empty or whitespace-only text; the caller
/// decides what that means for the document.
pub fn chunk_document(document_id: &str, text: &str, params: ChunkParams) -> Vec<Chunk> {
    let now = chrono::Utc::now().timestamp();
    split(text, params)
        .enumerate()
        .map(|(ordinal, span)| make_chunk(document_id, ordinal, span, now))
        .collect()
}

fn make_chunk(document_id: &str, ordinal: usize, span: Span<'_>, created_at: i64) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(span.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(document_id, ordinal),
        document_id: document_id.to_string(),
        ordinal,
        start: span.start,
        end: span.end,
        text: span.text.to_string(),
        hash,
        created_at,
    }
}
