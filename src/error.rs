//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Library operations return [`RetrievalError`]. Two variants mark a broken
//! invariant rather than bad input: [`RetrievalError::DimensionMismatch`] and
//! [`RetrievalError::IndexCorrupted`]. Both are logged at `error` level where
//! they are detected and both leave the index in a queryable state.

use thiserror::Error;

use crate::extract::ExtractError;

/// Main error type for indexing and retrieval operations.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The file could not be read or its type is unsupported.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// Plain-text input is not valid UTF-8.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// Extraction succeeded but produced nothing to index.
    #[error("no indexable content after chunking")]
    EmptyAfterChunking,

    /// A vector's length differs from the index's established dimensionality.
    #[error("dimension mismatch: index expects {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query or comparison against an identifier with no indexed entries.
    #[error("document '{0}' has no indexed content")]
    DocumentNotFound(String),

    /// The persisted index could not be read.
    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExtractError> for RetrievalError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Encoding { .. } => RetrievalError::EncodingError(err.to_string()),
            other => RetrievalError::ExtractionFailed(other.to_string()),
        }
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
