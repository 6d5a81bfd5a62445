//! Core data models used throughout the retrieval subsystem.
//!
//! These types represent the documents, chunks, index entries and query
//! results that flow through the ingestion and retrieval pipeline. Every
//! result type handed to collaborators is `Serialize`.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`DocumentRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Completed,
    Failed,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            "deleted" => Some(DocumentStatus::Deleted),
            _ => None,
        }
    }
}

/// Position of one ingestion in the pipeline state machine.
///
/// ```text
/// received ─▶ extracted ─▶ chunked ─▶ completed
///     │           │           │
///     ▼           ▼           ▼
/// extraction_  empty_after_  indexing_
///   failed      chunking      failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Received,
    Extracted,
    ExtractionFailed,
    Chunked,
    EmptyAfterChunking,
    Completed,
    IndexingFailed,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStage::Received => "received",
            IngestionStage::Extracted => "extracted",
            IngestionStage::ExtractionFailed => "extraction_failed",
            IngestionStage::Chunked => "chunked",
            IngestionStage::EmptyAfterChunking => "empty_after_chunking",
            IngestionStage::Completed => "completed",
            IngestionStage::IndexingFailed => "indexing_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(IngestionStage::Received),
            "extracted" => Some(IngestionStage::Extracted),
            "extraction_failed" => Some(IngestionStage::ExtractionFailed),
            "chunked" => Some(IngestionStage::Chunked),
            "empty_after_chunking" => Some(IngestionStage::EmptyAfterChunking),
            "completed" => Some(IngestionStage::Completed),
            "indexing_failed" => Some(IngestionStage::IndexingFailed),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            IngestionStage::ExtractionFailed
                | IngestionStage::EmptyAfterChunking
                | IngestionStage::IndexingFailed
        )
    }
}

/// One uploaded source file, as persisted by the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: Option<String>,
    pub content_type: String,
    /// SHA-256 of the raw uploaded bytes (hex).
    pub content_hash: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub failure_stage: Option<IngestionStage>,
    pub failure_reason: Option<String>,
    pub char_count: usize,
    pub word_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A document record together with its retained source text.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub text: String,
}

/// A contiguous text segment of a document.
///
/// Offsets are character (not byte) positions into the retained source text,
/// half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub hash: String,
    pub created_at: i64,
}

/// A persisted (chunk id, vector, metadata, text) tuple in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub total_chunks: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text` (hex).
    pub content_hash: String,
    /// Unix timestamp of the ingestion that produced the chunk.
    pub created_at: i64,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk, total_chunks: usize, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            ordinal: chunk.ordinal,
            total_chunks,
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
            content_hash: chunk.hash.clone(),
            created_at: chunk.created_at,
            vector,
        }
    }
}

/// A single index search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub total_chunks: usize,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

/// Outcome of one `add_document` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub document_id: String,
    pub status: IngestionStatus,
    /// Terminal stage reached: `completed` or one of the `*_failed` stages.
    pub stage: IngestionStage,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the content hash matched and nothing was re-indexed.
    pub unchanged: bool,
}

impl IngestionResult {
    pub fn is_completed(&self) -> bool {
        self.status == IngestionStatus::Completed
    }
}

/// A chunk returned for a document-scoped question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f64,
    pub ordinal: usize,
}

/// Answer-generation context for a question about one document.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub document_id: String,
    pub question: String,
    pub chunks: Vec<RetrievedChunk>,
}

impl QueryResponse {
    /// The ranked chunk texts joined by blank lines, ready for the
    /// external answer generator.
    pub fn context_text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A chunk returned by a corpus-wide search.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusHit {
    pub text: String,
    pub score: f64,
    pub document_id: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusSearchResponse {
    pub question: String,
    pub chunks: Vec<CorpusHit>,
}

/// Corpus search hits aggregated per document (MAX aggregation).
#[derive(Debug, Clone, Serialize)]
pub struct DocumentGroup {
    pub document_id: String,
    pub max_similarity: f64,
    pub hit_count: usize,
    pub top_chunks: Vec<CorpusHit>,
}

/// A chunk whose best match in the other document is weak.
#[derive(Debug, Clone, Serialize)]
pub struct UniqueChunk {
    pub ordinal: usize,
    pub text: String,
    /// Similarity of this chunk's nearest neighbor in the other document.
    pub nearest_similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub document_a: String,
    pub document_b: String,
    /// Cosine similarity of the two documents' chunk centroids.
    pub overall_similarity: f64,
    pub unique_to_a: Vec<UniqueChunk>,
    pub unique_to_b: Vec<UniqueChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub document_id: String,
    pub removed_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStatistics {
    pub total_chunks: usize,
    pub total_documents: usize,
    /// Established vector dimensionality, if anything has been indexed.
    pub dimension: Option<usize>,
    /// True if the index was rebuilt empty after a corrupted load.
    pub index_recovered: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub failed: Vec<String>,
}
