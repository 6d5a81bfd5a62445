//! Retrieval coordinator: the single entry point collaborators call.
//!
//! Drives ingestion (extract → chunk → embed → index → catalog) and
//! query-time retrieval over the [`VectorIndex`].
//!
//! # Ingestion state machine
//!
//! ```text
//! received ─▶ extracted ─▶ chunked ─▶ completed
//!     │           │           │
//!     ▼           ▼           ▼
//! extraction_  empty_after_  indexing_
//!   failed      chunking      failed
//! ```
//!
//! A failure at any stage leaves the index exactly as it was: a document's
//! prior entries are only replaced by the single transaction at the end.
//! The index is committed before the catalog, so the catalog never claims
//! content the index does not hold.
//!
//! # Concurrency
//!
//! Ingestion and deletion of the same document id are serialized through
//! [`DocumentLocks`]; different documents proceed concurrently. Corpus-wide
//! operations ([`RetrievalCoordinator::rebuild_index`] and
//! [`RetrievalCoordinator::reset`]) hold the corpus gate exclusively, so no
//! ingestion or deletion commits while they run. Searches take no lock.
//! Extraction and embedding run on the blocking pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::chunk::{chunk_document, ChunkParams};
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Result, RetrievalError};
use crate::extract::{ExtractionSettings, TextExtractor};
use crate::index::{IndexHealth, VectorIndex};
use crate::models::{
    ComparisonReport, CorpusHit, CorpusSearchResponse, CorpusStatistics, DeleteResult,
    DocumentGroup, DocumentRecord, DocumentStatus, IndexEntry, IngestionResult, IngestionStage,
    IngestionStatus, QueryResponse, RebuildReport, RetrievedChunk, StoredDocument,
};
use crate::ocr::create_recognizer;
use crate::search::{group_by_document, overall_similarity, unique_chunks};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub document_id: String,
    pub filename: Option<String>,
    /// Declared MIME type or bare extension.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub unique_threshold: f64,
    pub max_unique_chunks: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            unique_threshold: config.unique_threshold,
            max_unique_chunks: config.max_unique_chunks,
        }
    }
}

/// Per-document async locks.
///
/// Entries nobody holds or waits on are pruned on each acquire.
#[derive(Default)]
pub struct DocumentLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(document_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RetrievalCoordinator {
    index: VectorIndex,
    catalog: Catalog,
    extractor: TextExtractor,
    embedder: Arc<dyn Embedder>,
    chunk_params: ChunkParams,
    retrieval: RetrievalSettings,
    locks: DocumentLocks,
    /// Shared by per-document writes, exclusive for corpus-wide rewrites.
    corpus_gate: RwLock<()>,
}

impl RetrievalCoordinator {
    pub fn new(
        index: VectorIndex,
        catalog: Catalog,
        extractor: TextExtractor,
        embedder: Arc<dyn Embedder>,
        chunk_params: ChunkParams,
        retrieval: RetrievalSettings,
    ) -> Self {
        Self {
            index,
            catalog,
            extractor,
            embedder,
            chunk_params,
            retrieval,
            locks: DocumentLocks::default(),
            corpus_gate: RwLock::new(()),
        }
    }

    /// Build every component from configuration.
    pub async fn open(config: &Config) -> Result<Self> {
        let chunk_params =
            ChunkParams::new(config.chunking.chunk_chars, config.chunking.overlap_chars)?;
        let recognizer = create_recognizer(&config.extraction)?;
        let extractor = TextExtractor::new(ExtractionSettings::from(&config.extraction), recognizer);

        let embedding_config = config.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || create_embedder(&embedding_config))
            .await
            .map_err(|e| RetrievalError::Embedding(format!("model load task failed: {}", e)))??;

        let index = VectorIndex::open(&config.storage.index_path).await?;
        if let IndexHealth::Recovered { reason, .. } = index.health() {
            warn!(%reason, "index was rebuilt empty; run `luminary rebuild` to restore it from the catalog");
        }
        let catalog = Catalog::open(&config.storage.catalog_path).await?;

        Ok(Self::new(
            index,
            catalog,
            extractor,
            embedder,
            chunk_params,
            RetrievalSettings::from(&config.retrieval),
        ))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn index_health(&self) -> &IndexHealth {
        self.index.health()
    }

    pub fn retrieval_settings(&self) -> &RetrievalSettings {
        &self.retrieval
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    // ============ Ingestion ============

    /// Ingest raw bytes under `document_id`.
    pub async fn add_document(
        &self,
        document_id: &str,
        raw_bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<IngestionResult> {
        self.ingest(Upload {
            document_id: document_id.to_string(),
            filename: None,
            content_type: content_type.to_string(),
            bytes: raw_bytes,
        })
        .await
    }

    /// Ingest one upload.
    ///
    /// Pipeline failures come back as `Ok` with `status = failed`; `Err` is
    /// reserved for invalid input and catalog storage errors.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestionResult> {
        if upload.document_id.trim().is_empty() {
            return Err(RetrievalError::InvalidInput(
                "document id must not be empty".to_string(),
            ));
        }
        let _corpus = self.corpus_gate.read().await;
        let _guard = self.locks.acquire(&upload.document_id).await;
        let document_id = upload.document_id.as_str();

        let content_hash = sha256_hex(&upload.bytes);
        let prior = self.catalog.get(document_id).await?;

        // Unchanged bytes are a no-op only while the index still holds the
        // document; after a recovered or reset index they are re-indexed.
        if let Some(prior) = prior.as_ref() {
            if prior.status == DocumentStatus::Completed && prior.content_hash == content_hash {
                let indexed = self.index.count_for_document(document_id).await?;
                if indexed == prior.chunk_count {
                    info!(document_id, "content unchanged, skipping");
                    return Ok(IngestionResult {
                        document_id: document_id.to_string(),
                        status: IngestionStatus::Completed,
                        stage: IngestionStage::Completed,
                        chunk_count: prior.chunk_count,
                        error: None,
                        unchanged: true,
                    });
                }
                warn!(
                    document_id,
                    indexed,
                    expected = prior.chunk_count,
                    "content unchanged but index entries missing, re-indexing"
                );
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut record = DocumentRecord {
            id: document_id.to_string(),
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            content_hash,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            failure_stage: None,
            failure_reason: None,
            char_count: 0,
            word_count: 0,
            created_at: prior.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        let had_completed = prior
            .as_ref()
            .is_some_and(|p| p.status == DocumentStatus::Completed);
        if !had_completed {
            self.catalog.upsert(&record, None).await?;
        }
        debug!(
            document_id,
            stage = IngestionStage::Received.as_str(),
            bytes = upload.bytes.len(),
            "received"
        );

        // Extract
        let extractor = self.extractor.clone();
        let Upload {
            bytes,
            content_type,
            filename,
            ..
        } = upload;
        let extracted = tokio::task::spawn_blocking(move || {
            extractor.extract(&bytes, &content_type, filename.as_deref())
        })
        .await;
        let extracted = match extracted {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => {
                return self
                    .fail(record, had_completed, IngestionStage::ExtractionFailed, e.into())
                    .await
            }
            Err(join) => {
                let err = RetrievalError::ExtractionFailed(format!("extraction task failed: {}", join));
                return self
                    .fail(record, had_completed, IngestionStage::ExtractionFailed, err)
                    .await;
            }
        };
        record.content_type = extracted.kind.mime().to_string();
        record.char_count = extracted.text.chars().count();
        record.word_count = extracted.text.split_whitespace().count();
        debug!(
            document_id,
            stage = IngestionStage::Extracted.as_str(),
            method = extracted.method.as_str(),
            chars = record.char_count,
            "extracted"
        );

        // Chunk
        let chunks = chunk_document(document_id, &extracted.text, self.chunk_params);
        if chunks.is_empty() {
            return self
                .fail(
                    record,
                    had_completed,
                    IngestionStage::EmptyAfterChunking,
                    RetrievalError::EmptyAfterChunking,
                )
                .await;
        }
        debug!(
            document_id,
            stage = IngestionStage::Chunked.as_str(),
            chunks = chunks.len(),
            "chunked"
        );

        // Embed and index
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.embed_texts(texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                return self
                    .fail(record, had_completed, IngestionStage::IndexingFailed, e)
                    .await
            }
        };
        let total = chunks.len();
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, total, vector))
            .collect();
        let replaced = match self.index.replace_document(document_id, entries).await {
            Ok(replaced) => replaced,
            Err(e) => {
                return self
                    .fail(record, had_completed, IngestionStage::IndexingFailed, e)
                    .await
            }
        };

        record.status = DocumentStatus::Completed;
        record.chunk_count = total;
        record.updated_at = chrono::Utc::now().timestamp();
        if let Err(e) = self.catalog.upsert(&record, Some(&extracted.text)).await {
            error!(document_id, error = %e, "index committed but catalog update failed");
        }

        info!(document_id, chunks = total, replaced, "document ingested");
        Ok(IngestionResult {
            document_id: document_id.to_string(),
            status: IngestionStatus::Completed,
            stage: IngestionStage::Completed,
            chunk_count: total,
            error: None,
            unchanged: false,
        })
    }

    async fn fail(
        &self,
        mut record: DocumentRecord,
        had_completed: bool,
        stage: IngestionStage,
        err: RetrievalError,
    ) -> Result<IngestionResult> {
        warn!(document_id = %record.id, stage = stage.as_str(), error = %err, "ingestion failed");

        // A failed re-ingest keeps the previous good record and entries.
        if !had_completed {
            record.status = DocumentStatus::Failed;
            record.failure_stage = Some(stage);
            record.failure_reason = Some(err.to_string());
            record.updated_at = chrono::Utc::now().timestamp();
            self.catalog.upsert(&record, None).await?;
        }

        Ok(IngestionResult {
            document_id: record.id,
            status: IngestionStatus::Failed,
            stage,
            chunk_count: 0,
            error: Some(err.to_string()),
            unchanged: false,
        })
    }

    /// Ingest a batch. Items are isolated: one failure does not stop the rest.
    pub async fn add_documents(&self, uploads: Vec<Upload>) -> Vec<Result<IngestionResult>> {
        let mut results = Vec::with_capacity(uploads.len());
        for upload in uploads {
            results.push(self.ingest(upload).await);
        }
        results
    }

    // ============ Retrieval ============

    /// Rank one document's chunks against `question`.
    pub async fn query_document(
        &self,
        document_id: &str,
        question: &str,
        top_k: usize,
    ) -> Result<QueryResponse> {
        check_top_k(top_k)?;
        let query = self.embed_query(question).await?;
        let hits = self.index.search(&query, top_k, Some(document_id)).await?;
        if hits.is_empty() {
            return Err(RetrievalError::DocumentNotFound(document_id.to_string()));
        }

        Ok(QueryResponse {
            document_id: document_id.to_string(),
            question: question.to_string(),
            chunks: hits
                .into_iter()
                .map(|h| RetrievedChunk {
                    text: h.text,
                    score: h.score,
                    ordinal: h.ordinal,
                })
                .collect(),
        })
    }

    /// Rank chunks across every document.
    pub async fn search_corpus(&self, question: &str, top_k: usize) -> Result<CorpusSearchResponse> {
        check_top_k(top_k)?;
        let chunks = self.corpus_hits(question, top_k).await?;
        Ok(CorpusSearchResponse {
            question: question.to_string(),
            chunks,
        })
    }

    /// Cross-document discovery: hits grouped per document.
    ///
    /// Draws `2 × top_k` chunk candidates so a document with several strong
    /// chunks does not crowd out the others.
    pub async fn search_corpus_grouped(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<DocumentGroup>> {
        check_top_k(top_k)?;
        let hits = self.corpus_hits(question, top_k.saturating_mul(2)).await?;
        Ok(group_by_document(hits))
    }

    async fn corpus_hits(&self, question: &str, k: usize) -> Result<Vec<CorpusHit>> {
        let query = self.embed_query(question).await?;
        let hits = self.index.search(&query, k, None).await?;
        Ok(hits
            .into_iter()
            .map(|h| CorpusHit {
                text: h.text,
                score: h.score,
                document_id: h.document_id,
                ordinal: h.ordinal,
            })
            .collect())
    }

    /// Overall similarity plus the chunks each document has that the other
    /// lacks.
    pub async fn compare_documents(&self, a: &str, b: &str) -> Result<ComparisonReport> {
        let entries_a = self.index.entries_for_document(a).await?;
        if entries_a.is_empty() {
            return Err(RetrievalError::DocumentNotFound(a.to_string()));
        }
        let entries_b = self.index.entries_for_document(b).await?;
        if entries_b.is_empty() {
            return Err(RetrievalError::DocumentNotFound(b.to_string()));
        }

        let threshold = self.retrieval.unique_threshold;
        let max = self.retrieval.max_unique_chunks;
        Ok(ComparisonReport {
            document_a: a.to_string(),
            document_b: b.to_string(),
            overall_similarity: overall_similarity(&entries_a, &entries_b),
            unique_to_a: unique_chunks(&entries_a, &entries_b, threshold, max),
            unique_to_b: unique_chunks(&entries_b, &entries_a, threshold, max),
        })
    }

    // ============ Management ============

    /// Remove a document's entries and mark it deleted. Idempotent.
    pub async fn delete_document(&self, document_id: &str) -> Result<DeleteResult> {
        let _corpus = self.corpus_gate.read().await;
        let _guard = self.locks.acquire(document_id).await;
        let removed_count = self.index.delete_document(document_id).await?;
        self.catalog.mark_deleted(document_id).await?;
        info!(document_id, removed_count, "document deleted");
        Ok(DeleteResult {
            document_id: document_id.to_string(),
            removed_count,
        })
    }

    pub async fn get_statistics(&self) -> Result<CorpusStatistics> {
        let stats = self.index.statistics().await?;
        Ok(CorpusStatistics {
            total_chunks: stats.total_entries,
            total_documents: stats.total_documents,
            dimension: stats.dimension,
            index_recovered: self.index.health().is_recovered(),
        })
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        self.catalog.get_with_text(document_id).await
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.catalog.list().await
    }

    /// Rebuild the index from the catalog's retained text.
    ///
    /// Clears the index first so a changed embedding model can establish
    /// its own dimensionality.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        let _corpus = self.corpus_gate.write().await;
        let ids = self.catalog.completed_ids().await?;
        self.index.reset().await?;

        let mut report = RebuildReport::default();
        for id in ids {
            match self.reindex_from_catalog(&id).await {
                Ok(chunks) => {
                    report.documents += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    warn!(document_id = %id, error = %e, "rebuild skipped document");
                    report.failed.push(id);
                }
            }
        }
        info!(
            documents = report.documents,
            chunks = report.chunks,
            failed = report.failed.len(),
            "index rebuilt"
        );
        Ok(report)
    }

    async fn reindex_from_catalog(&self, document_id: &str) -> Result<usize> {
        let stored = self
            .catalog
            .get_with_text(document_id)
            .await?
            .ok_or_else(|| RetrievalError::DocumentNotFound(document_id.to_string()))?;

        let chunks = chunk_document(document_id, &stored.text, self.chunk_params);
        if chunks.is_empty() {
            return Err(RetrievalError::EmptyAfterChunking);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_texts(texts).await?;
        let total = chunks.len();
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, total, vector))
            .collect();
        self.index.replace_document(document_id, entries).await?;

        if stored.record.chunk_count != total {
            let mut record = stored.record;
            record.chunk_count = total;
            record.updated_at = chrono::Utc::now().timestamp();
            self.catalog.upsert(&record, None).await?;
        }
        Ok(total)
    }

    /// Empty both the index and the catalog.
    pub async fn reset(&self) -> Result<()> {
        let _corpus = self.corpus_gate.write().await;
        self.index.reset().await?;
        self.catalog.reset().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.index.close().await;
        self.catalog.close().await;
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        self.embed_texts(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embedding task failed: {}", e)))??;
        if vectors.len() != expected {
            return Err(RetrievalError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(RetrievalError::InvalidInput("top_k must be >= 1".to_string()));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
