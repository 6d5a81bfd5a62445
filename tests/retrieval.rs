//! End-to-end tests for the retrieval coordinator.
//!
//! Every test builds a coordinator over fresh SQLite files in a temp
//! directory, using the hashing embedder so results are deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use luminary_index::catalog::Catalog;
use luminary_index::chunk::ChunkParams;
use luminary_index::coordinator::{RetrievalCoordinator, RetrievalSettings, Upload};
use luminary_index::embedding::{Embedder, HashingEmbedder};
use luminary_index::error::{Result, RetrievalError};
use luminary_index::extract::{ExtractionSettings, TextExtractor};
use luminary_index::index::VectorIndex;
use luminary_index::models::{DocumentStatus, IngestionStage, IngestionStatus, QueryResponse};
use luminary_index::ocr::UnavailableRecognizer;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const DIMS: usize = 1024;

const LEASE: &str = "The tenant may terminate this lease with ninety days written notice. \
    Rent is payable monthly in advance to the landlord.";
const NDA: &str = "The receiving party shall keep all confidential information secret \
    and shall not disclose it to any third party without consent.";

/// Hashing embedder that can be switched to return vectors of the wrong size.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    broken: AtomicBool,
}

impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.inner.embed_batch(texts)?;
        if self.broken.load(Ordering::SeqCst) {
            for v in &mut vectors {
                v.push(0.0);
            }
        }
        Ok(vectors)
    }
}

async fn coordinator_with(
    dir: &TempDir,
    embedder: Arc<dyn Embedder>,
) -> RetrievalCoordinator {
    let index = VectorIndex::open(&dir.path().join("index.sqlite"))
        .await
        .unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.sqlite"))
        .await
        .unwrap();
    let extractor = TextExtractor::new(
        ExtractionSettings::default(),
        Arc::new(UnavailableRecognizer),
    );
    RetrievalCoordinator::new(
        index,
        catalog,
        extractor,
        embedder,
        ChunkParams::default(),
        RetrievalSettings::default(),
    )
}

async fn coordinator(dir: &TempDir) -> RetrievalCoordinator {
    coordinator_with(dir, Arc::new(HashingEmbedder::new(DIMS).unwrap())).await
}

fn text_upload(id: &str, text: &str) -> Upload {
    Upload {
        document_id: id.to_string(),
        filename: Some(format!("{}.txt", id)),
        content_type: "text/plain".to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

/// 1200 characters with no whitespace, so normalization keeps them all.
fn twelve_hundred_chars() -> String {
    "abcdefghij".repeat(120)
}

#[tokio::test]
async fn test_ingest_and_query_document() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    let result = c
        .add_document("lease", LEASE.as_bytes().to_vec(), "text/plain")
        .await
        .unwrap();
    assert_eq!(result.status, IngestionStatus::Completed);
    assert_eq!(result.stage, IngestionStage::Completed);
    assert_eq!(result.chunk_count, 1);
    assert!(!result.unchanged);

    let response = c
        .query_document("lease", "how can the tenant terminate the lease?", 5)
        .await
        .unwrap();
    assert_eq!(response.chunks.len(), 1);
    assert!(response.chunks[0].score > 0.0);
    assert!(response.context_text().contains("ninety days"));

    let record = c.get_document("lease").await.unwrap().unwrap();
    assert_eq!(record.record.status, DocumentStatus::Completed);
    assert_eq!(record.record.content_type, "text/plain");
    assert_eq!(record.text, LEASE.split_whitespace().collect::<Vec<_>>().join(" "));
}

#[tokio::test]
async fn test_twelve_hundred_chars_make_three_chunks() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    let result = c
        .add_document("long", twelve_hundred_chars().into_bytes(), "txt")
        .await
        .unwrap();
    assert_eq!(result.chunk_count, 3);

    let response = c.query_document("long", "abcdefghij", 10).await.unwrap();
    let mut ordinals: Vec<usize> = response.chunks.iter().map(|ch| ch.ordinal).collect();
    ordinals.sort_unstable();
    assert_eq!(ordinals, vec![0, 1, 2]);

    let lengths: Vec<usize> = {
        let mut by_ordinal: Vec<_> = response.chunks.iter().collect();
        by_ordinal.sort_by_key(|ch| ch.ordinal);
        by_ordinal.iter().map(|ch| ch.text.chars().count()).collect()
    };
    assert_eq!(lengths, vec![500, 500, 400]);
}

#[tokio::test]
async fn test_unchanged_content_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    let first = c.ingest(text_upload("lease", LEASE)).await.unwrap();
    let before = c.get_document("lease").await.unwrap().unwrap().record;

    let entries_before = c.index().entries_for_document("lease").await.unwrap();
    assert_eq!(entries_before.len(), 1);
    assert_eq!(
        entries_before[0].content_hash,
        format!("{:x}", Sha256::digest(entries_before[0].text.as_bytes()))
    );

    let second = c.ingest(text_upload("lease", LEASE)).await.unwrap();
    assert!(second.is_completed());
    assert!(second.unchanged);
    assert_eq!(second.chunk_count, first.chunk_count);

    let after = c.get_document("lease").await.unwrap().unwrap().record;
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(c.get_statistics().await.unwrap().total_chunks, 1);
    let entries_after = c.index().entries_for_document("lease").await.unwrap();
    assert_eq!(entries_after, entries_before);
}

#[tokio::test]
async fn test_reingest_replaces_all_prior_entries() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    c.add_document("doc", twelve_hundred_chars().into_bytes(), "txt")
        .await
        .unwrap();
    assert_eq!(c.get_statistics().await.unwrap().total_chunks, 3);

    let result = c
        .add_document("doc", LEASE.as_bytes().to_vec(), "txt")
        .await
        .unwrap();
    assert!(result.is_completed());
    assert!(!result.unchanged);
    assert_eq!(result.chunk_count, 1);

    let stats = c.get_statistics().await.unwrap();
    assert_eq!(stats.total_chunks, 1);
    assert_eq!(stats.total_documents, 1);

    let response = c.query_document("doc", "abcdefghij", 10).await.unwrap();
    assert_eq!(response.chunks.len(), 1);
    assert!(response.chunks[0].text.contains("tenant"));
}

#[tokio::test]
async fn test_search_corpus_ranks_relevant_document_first() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    c.ingest(text_upload("lease", LEASE)).await.unwrap();
    c.ingest(text_upload("nda", NDA)).await.unwrap();

    let response = c
        .search_corpus("disclose confidential information to a third party", 5)
        .await
        .unwrap();
    assert_eq!(response.chunks.len(), 2);
    assert_eq!(response.chunks[0].document_id, "nda");
    assert!(response.chunks[0].score >= response.chunks[1].score);

    let groups = c
        .search_corpus_grouped("tenant rent landlord", 5)
        .await
        .unwrap();
    assert_eq!(groups[0].document_id, "lease");
    assert_eq!(groups[0].hit_count, 1);
}

#[tokio::test]
async fn test_unknown_document_and_bad_top_k() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    c.ingest(text_upload("lease", LEASE)).await.unwrap();

    let err = c.query_document("missing", "anything", 3).await.unwrap_err();
    assert!(matches!(err, RetrievalError::DocumentNotFound(ref id) if id == "missing"));

    let err = c.query_document("lease", "rent", 0).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidInput(_)));

    let err = c.search_corpus("rent", 0).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidInput(_)));

    let err = c.compare_documents("lease", "missing").await.unwrap_err();
    assert!(matches!(err, RetrievalError::DocumentNotFound(_)));
}

#[tokio::test]
async fn test_search_empty_corpus_returns_nothing() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    let response = c.search_corpus("anything", 5).await.unwrap();
    assert!(response.chunks.is_empty());
    assert!(c.search_corpus_grouped("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_removes_every_entry() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    c.add_document("long", twelve_hundred_chars().into_bytes(), "txt")
        .await
        .unwrap();
    c.ingest(text_upload("nda", NDA)).await.unwrap();

    let deleted = c.delete_document("long").await.unwrap();
    assert_eq!(deleted.removed_count, 3);

    let err = c.query_document("long", "abcdefghij", 5).await.unwrap_err();
    assert!(matches!(err, RetrievalError::DocumentNotFound(_)));
    let hits = c.search_corpus("abcdefghij", 10).await.unwrap();
    assert!(hits.chunks.iter().all(|h| h.document_id != "long"));

    let stored = c.get_document("long").await.unwrap().unwrap();
    assert_eq!(stored.record.status, DocumentStatus::Deleted);
    assert!(stored.text.is_empty());

    let listed: Vec<String> = c
        .list_documents()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(listed, vec!["nda".to_string()]);

    // Idempotent.
    assert_eq!(c.delete_document("long").await.unwrap().removed_count, 0);
}

#[tokio::test]
async fn test_compare_disjoint_documents() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    c.ingest(text_upload("a", "alpha bravo charlie delta echo foxtrot"))
        .await
        .unwrap();
    c.ingest(text_upload("b", "golf hotel india juliet kilo lima"))
        .await
        .unwrap();

    let report = c.compare_documents("a", "b").await.unwrap();
    assert!(report.overall_similarity.abs() < 0.3, "{}", report.overall_similarity);
    assert_eq!(report.unique_to_a.len(), 1);
    assert_eq!(report.unique_to_b.len(), 1);
    assert!(report.unique_to_a[0].text.contains("alpha"));

    let same = c.compare_documents("a", "a").await.unwrap();
    assert!((same.overall_similarity - 1.0).abs() < 1e-6);
    assert!(same.unique_to_a.is_empty());
}

#[tokio::test]
async fn test_failed_reingest_preserves_prior_entries() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(FlakyEmbedder {
        inner: HashingEmbedder::new(DIMS).unwrap(),
        broken: AtomicBool::new(false),
    });
    let c = coordinator_with(&tmp, embedder.clone()).await;

    c.ingest(text_upload("nda", NDA)).await.unwrap();
    c.ingest(text_upload("lease", LEASE)).await.unwrap();

    embedder.broken.store(true, Ordering::SeqCst);
    let result = c
        .ingest(text_upload("lease", "An amended lease with different terms."))
        .await
        .unwrap();
    assert_eq!(result.status, IngestionStatus::Failed);
    assert_eq!(result.stage, IngestionStage::IndexingFailed);
    assert!(result.error.unwrap().contains("dimension mismatch"));

    embedder.broken.store(false, Ordering::SeqCst);
    let response = c.query_document("lease", "tenant notice", 5).await.unwrap();
    assert!(response.chunks[0].text.contains("ninety days"));

    let stored = c.get_document("lease").await.unwrap().unwrap();
    assert_eq!(stored.record.status, DocumentStatus::Completed);
    assert!(stored.text.contains("ninety days"));
    assert_eq!(c.get_statistics().await.unwrap().dimension, Some(DIMS));
}

#[tokio::test]
async fn test_failure_stages_are_recorded() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    let empty = c
        .add_document("blank", b"   \n\n\t  \n".to_vec(), "text/plain")
        .await
        .unwrap();
    assert_eq!(empty.status, IngestionStatus::Failed);
    assert_eq!(empty.stage, IngestionStage::EmptyAfterChunking);

    let unsupported = c
        .add_document("image", vec![0x89, b'P', b'N', b'G'], "image/png")
        .await
        .unwrap();
    assert_eq!(unsupported.stage, IngestionStage::ExtractionFailed);
    assert!(unsupported.error.unwrap().contains("unsupported content type"));

    let mut bytes = b"Clause 1".to_vec();
    bytes.push(0xC3);
    let bad = c.add_document("latin1", bytes, "txt").await.unwrap();
    assert_eq!(bad.stage, IngestionStage::ExtractionFailed);
    assert!(bad.error.unwrap().contains("encoding error"));

    let record = c.get_document("blank").await.unwrap().unwrap().record;
    assert_eq!(record.status, DocumentStatus::Failed);
    assert_eq!(record.failure_stage, Some(IngestionStage::EmptyAfterChunking));
    assert_eq!(c.get_statistics().await.unwrap().total_chunks, 0);
}

#[tokio::test]
async fn test_batch_items_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;

    let results = c
        .add_documents(vec![
            text_upload("lease", LEASE),
            Upload {
                document_id: "broken".to_string(),
                filename: None,
                content_type: "txt".to_string(),
                bytes: vec![0xFF, 0xFE, 0x00],
            },
            text_upload("nda", NDA),
            text_upload("  ", "no id"),
        ])
        .await;

    assert_eq!(results.len(), 4);
    assert!(results[0].as_ref().unwrap().is_completed());
    assert!(!results[1].as_ref().unwrap().is_completed());
    assert!(results[2].as_ref().unwrap().is_completed());
    assert!(matches!(results[3], Err(RetrievalError::InvalidInput(_))));

    assert_eq!(c.get_statistics().await.unwrap().total_documents, 2);
}

#[tokio::test]
async fn test_concurrent_ingestion_of_distinct_documents() {
    let tmp = TempDir::new().unwrap();
    let c = Arc::new(coordinator(&tmp).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let c = Arc::clone(&c);
        handles.push(tokio::spawn(async move {
            c.ingest(text_upload(
                &format!("doc-{}", i),
                &format!("Document number {} about clause {}", i, i * 7),
            ))
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_completed());
    }

    let stats = c.get_statistics().await.unwrap();
    assert_eq!(stats.total_documents, 8);
    assert_eq!(stats.total_chunks, 8);
}

#[tokio::test]
async fn test_corrupted_index_recovers_and_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let index_path = tmp.path().join("index.sqlite");
    {
        let c = coordinator(&tmp).await;
        c.ingest(text_upload("lease", LEASE)).await.unwrap();
        c.ingest(text_upload("nda", NDA)).await.unwrap();
        c.close().await;
    }

    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", index_path.display(), suffix));
    }
    std::fs::write(&index_path, b"this is not a sqlite database at all").unwrap();

    let c = coordinator(&tmp).await;
    assert!(c.index_health().is_recovered());
    let stats = c.get_statistics().await.unwrap();
    assert!(stats.index_recovered);
    assert_eq!(stats.total_chunks, 0);

    let report = c.rebuild_index().await.unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 2);
    assert!(report.failed.is_empty());

    let response = c.query_document("nda", "confidential", 3).await.unwrap();
    assert!(response.chunks[0].text.contains("confidential"));
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let tmp = TempDir::new().unwrap();
    let c = coordinator(&tmp).await;
    c.ingest(text_upload("lease", LEASE)).await.unwrap();

    c.reset().await.unwrap();
    let stats = c.get_statistics().await.unwrap();
    assert_eq!(stats.total_chunks, 0);
    assert_eq!(stats.dimension, None);
    assert!(c.list_documents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_readding_after_index_recovery_reindexes() {
    let tmp = TempDir::new().unwrap();
    let index_path = tmp.path().join("index.sqlite");
    {
        let c = coordinator(&tmp).await;
        c.ingest(text_upload("lease", LEASE)).await.unwrap();
        c.close().await;
    }

    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", index_path.display(), suffix));
    }
    std::fs::write(&index_path, b"garbage where the index used to be").unwrap();

    let c = coordinator(&tmp).await;
    assert!(c.index_health().is_recovered());

    let result = c
        .add_document("lease", LEASE.as_bytes().to_vec(), "text/plain")
        .await
        .unwrap();
    assert!(result.is_completed());
    assert!(!result.unchanged);
    assert_eq!(result.chunk_count, 1);
    assert_eq!(c.get_statistics().await.unwrap().total_chunks, 1);

    let response = c.query_document("lease", "terminate the lease", 3).await.unwrap();
    assert!(response.chunks[0].text.contains("terminate"));

    let again = c
        .add_document("lease", LEASE.as_bytes().to_vec(), "text/plain")
        .await
        .unwrap();
    assert!(again.unchanged);
}

/// `Some('a')` when every chunk comes from the first version, `Some('k')`
/// when every chunk comes from the second, `None` when they are mixed.
fn version_of(response: &QueryResponse) -> Option<char> {
    let all_with = |marker: char| response.chunks.iter().all(|chunk| chunk.text.contains(marker));
    match (all_with('a'), all_with('k')) {
        (true, false) => Some('a'),
        (false, true) => Some('k'),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reingest_and_delete_never_mix_versions() {
    let tmp = TempDir::new().unwrap();
    let c = Arc::new(coordinator(&tmp).await);
    let v1 = twelve_hundred_chars();
    let v2 = "klmnopqrst".repeat(90);

    let v2_chunks = c
        .add_document("reference", v2.clone().into_bytes(), "txt")
        .await
        .unwrap()
        .chunk_count;

    for round in 0..6 {
        let id = format!("contract-{}", round);
        let v1_chunks = c
            .add_document(&id, v1.clone().into_bytes(), "txt")
            .await
            .unwrap()
            .chunk_count;

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let c = Arc::clone(&c);
            let stop = Arc::clone(&stop);
            let id = id.clone();
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    match c.query_document(&id, "abcdefghij klmnopqrst", 50).await {
                        Ok(response) => {
                            let version = version_of(&response);
                            assert!(version.is_some(), "mixed versions in one response");
                            let expected = if version == Some('a') { v1_chunks } else { v2_chunks };
                            assert_eq!(response.chunks.len(), expected);
                        }
                        Err(RetrievalError::DocumentNotFound(_)) => {}
                        Err(other) => panic!("unexpected query error: {}", other),
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let ingest = {
            let c = Arc::clone(&c);
            let upload = Upload {
                document_id: id.clone(),
                filename: None,
                content_type: "txt".to_string(),
                bytes: v2.clone().into_bytes(),
            };
            tokio::spawn(async move { c.ingest(upload).await })
        };
        let delete = {
            let c = Arc::clone(&c);
            let id = id.clone();
            tokio::spawn(async move { c.delete_document(&id).await })
        };
        assert!(ingest.await.unwrap().unwrap().is_completed());
        delete.await.unwrap().unwrap();
        stop.store(true, Ordering::SeqCst);
        reader.await.unwrap();

        let record = c.get_document(&id).await.unwrap().unwrap().record;
        let entries = c.index().entries_for_document(&id).await.unwrap();
        match record.status {
            DocumentStatus::Completed => {
                assert_eq!(entries.len(), v2_chunks);
                assert_eq!(record.chunk_count, v2_chunks);
                assert!(entries.iter().all(|e| e.text.contains('k') && !e.text.contains('a')));
            }
            DocumentStatus::Deleted => assert!(entries.is_empty()),
            other => panic!("unexpected final status {:?}", other),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ingest_during_rebuild_survives() {
    let tmp = TempDir::new().unwrap();
    let c = Arc::new(coordinator(&tmp).await);
    for i in 0..5 {
        c.ingest(text_upload(&format!("seed-{}", i), &format!("Seed document {} on clause {}", i, i * 3)))
            .await
            .unwrap();
    }

    let rebuild = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.rebuild_index().await })
    };
    let ingest = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.ingest(text_upload("nda", NDA)).await })
    };
    let report = rebuild.await.unwrap().unwrap();
    assert!(report.failed.is_empty());
    assert!(ingest.await.unwrap().unwrap().is_completed());

    let documents = c.list_documents().await.unwrap();
    assert_eq!(documents.len(), 6);
    let mut expected_total = 0;
    for record in &documents {
        assert_eq!(record.status, DocumentStatus::Completed);
        let indexed = c.index().count_for_document(&record.id).await.unwrap();
        assert_eq!(indexed, record.chunk_count, "catalog and index disagree on {}", record.id);
        expected_total += indexed;
    }
    assert_eq!(c.get_statistics().await.unwrap().total_chunks, expected_total);

    let response = c.query_document("nda", "confidential", 3).await.unwrap();
    assert!(response.chunks[0].text.contains("confidential"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ingest_racing_reset_leaves_consistent_state() {
    let tmp = TempDir::new().unwrap();
    let c = Arc::new(coordinator(&tmp).await);
    c.ingest(text_upload("lease", LEASE)).await.unwrap();

    let reset = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.reset().await })
    };
    let ingest = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.ingest(text_upload("nda", NDA)).await })
    };
    reset.await.unwrap().unwrap();
    let result = ingest.await.unwrap().unwrap();
    assert!(result.is_completed());

    // Either the ingest landed after the reset and is fully indexed, or
    // it was wiped along with everything else.
    let documents = c.list_documents().await.unwrap();
    let stats = c.get_statistics().await.unwrap();
    match documents.as_slice() {
        [] => assert_eq!(stats.total_chunks, 0),
        [only] => {
            assert_eq!(only.id, "nda");
            assert_eq!(stats.total_chunks, only.chunk_count);
        }
        more => panic!("unexpected documents after reset: {:?}", more),
    }
}
