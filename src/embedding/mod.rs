//! Embedding engine abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`HashingEmbedder`]**: signed feature hashing over word tokens. Pure
//!   Rust, deterministic, no model download. The default.
//! - **`FastEmbedEmbedder`**: runs a sentence-transformer locally via
//!   fastembed (cargo feature `local-embeddings-fastembed`). No network calls
//!   after the first model download.
//!
//! Also provides vector utilities used by the index and the coordinator:
//! - [`cosine_similarity`]: similarity between two vectors
//! - [`normalize_l2`]: scale a vector to unit length
//! - [`centroid`]: mean of a set of vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! # Provider Selection
//!
//! ```rust
//! # use luminary_index::config::EmbeddingConfig;
//! # use luminary_index::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "hashing-sha256");
//! assert_eq!(embedder.dims(), 384);
//! ```

#[cfg(feature = "local-embeddings-fastembed")]
mod fastembed;

#[cfg(feature = "local-embeddings-fastembed")]
pub use self::fastembed::FastEmbedEmbedder;

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{Result, RetrievalError};

/// Text → fixed-dimension vector.
///
/// Implementations must be deterministic for a fixed model, preserve input
/// order, and produce the same vector for a text whether it is embedded
/// alone or as part of a batch. Calls are blocking; async callers wrap them
/// in `spawn_blocking`.
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per text, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
    }
}

// ============ Hashing Embedder ============

/// Signed feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256; the first eight
/// bytes pick a dimension and the ninth byte picks a sign. Token weights are
/// sublinear (`1 + ln(tf)`) and the result is L2-normalized, so cosine
/// similarity approximates weighted vocabulary overlap. An empty or
/// token-free input yields the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RetrievalError::InvalidInput(
                "embedding dims must be > 0".to_string(),
            ));
        }
        Ok(Self { dims })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dims];
        for (token, tf) in &counts {
            let digest = Sha256::digest(token.as_bytes());
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(index_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + (*tf as f32).ln();
            vector[index] += sign * weight;
        }

        normalize_l2(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-sha256"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Create the [`Embedder`] selected by `[embedding] provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] with `embedding.dims` |
/// | `"local"` | `FastEmbedEmbedder` (requires `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(FastEmbedEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RetrievalError::InvalidInput(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(RetrievalError::InvalidInput(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use luminary_index::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize_l2(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Component-wise mean. `None` for an empty set or mixed lengths.
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0f32; first.len()];
    for v in vectors {
        if v.len() != sum.len() {
            return None;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
    }
    let n = vectors.len() as f32;
    for s in sum.iter_mut() {
        *s /= n;
    }
    Some(sum)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, zero
/// vectors, or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
