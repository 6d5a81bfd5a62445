//! Persistent vector index over SQLite.
//!
//! Each row of `index_entries` is one chunk: its vector (L2-normalized,
//! stored as a little-endian `f32` BLOB), its text, and the metadata needed
//! to cite it (document id, ordinal, total chunk count, character offsets).
//!
//! # Dimensionality
//!
//! The first insert into an empty index establishes the vector size and
//! records it in `index_meta`. Every later insert must match; a mismatch
//! rejects the whole batch with [`RetrievalError::DimensionMismatch`]. The
//! size is forgotten again whenever the index becomes empty (reset, or a
//! replace that removes the last document).
//!
//! # Consistency
//!
//! Writes are serialized through a single gate and each runs in one
//! transaction, so a document's entries are replaced or removed all at
//! once. Searches are single statements and, under WAL, see either the
//! state before or after a concurrent write.
//!
//! # Corruption
//!
//! [`VectorIndex::open`] verifies the file (SQLite header, `quick_check`,
//! schema, vector byte lengths). A file that fails verification is renamed
//! to `<file>.corrupt-<unix-ts>` and an empty index takes its place; the
//! outcome is reported through [`VectorIndex::health`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, normalize_l2, vec_to_blob};
use crate::error::{Result, RetrievalError};
use crate::migrate;
use crate::models::{IndexEntry, SearchHit};

const META_DIMS: &str = "dims";

/// How the index file looked when it was opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexHealth {
    Healthy,
    /// The file was unreadable and has been replaced by an empty index.
    Recovered {
        reason: String,
        quarantined: Option<PathBuf>,
    },
}

impl IndexHealth {
    pub fn is_recovered(&self) -> bool {
        matches!(self, IndexHealth::Recovered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatistics {
    pub total_entries: usize,
    pub total_documents: usize,
    pub dimension: Option<usize>,
}

pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    health: IndexHealth,
    write_gate: Mutex<()>,
}

impl VectorIndex {
    /// Open or create the index at `path`, recovering from corruption.
    pub async fn open(path: &Path) -> Result<Self> {
        let existed = path.exists();

        match open_verified(path).await {
            Ok(pool) => Ok(Self::from_pool(pool, path, IndexHealth::Healthy)),
            Err(reason) if existed => {
                let err = RetrievalError::IndexCorrupted(reason.clone());
                error!(path = %path.display(), "{}; rebuilding empty index", err);

                let quarantined = quarantine(path)?;
                let pool = open_verified(path)
                    .await
                    .map_err(RetrievalError::IndexCorrupted)?;
                Ok(Self::from_pool(
                    pool,
                    path,
                    IndexHealth::Recovered {
                        reason,
                        quarantined: Some(quarantined),
                    },
                ))
            }
            Err(reason) => Err(RetrievalError::IndexCorrupted(reason)),
        }
    }

    fn from_pool(pool: SqlitePool, path: &Path, health: IndexHealth) -> Self {
        Self {
            pool,
            path: path.to_path_buf(),
            health,
            write_gate: Mutex::new(()),
        }
    }

    pub fn health(&self) -> &IndexHealth {
        &self.health
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Established dimensionality, or `None` while the index is empty.
    pub async fn dimension(&self) -> Result<Option<usize>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(META_DIMS)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Upsert a batch of entries by chunk id. All-or-nothing.
    pub async fn insert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let dims = establish_dims(&mut tx, &entries).await?;
        let inserted = write_entries(&mut tx, entries, dims).await?;

        tx.commit().await?;
        debug!(inserted, dims, "index insert committed");
        Ok(inserted)
    }

    /// Atomically swap a document's entries for `entries`.
    ///
    /// Returns the number of entries removed. On error nothing changes.
    pub async fn replace_document(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        if let Some(stray) = entries.iter().find(|e| e.document_id != document_id) {
            return Err(RetrievalError::InvalidInput(format!(
                "entry {} belongs to '{}', not '{}'",
                stray.chunk_id, stray.document_id, document_id
            )));
        }

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM index_entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        if entries.is_empty() {
            forget_dims_if_empty(&mut tx).await?;
        } else {
            let dims = establish_dims(&mut tx, &entries).await?;
            write_entries(&mut tx, entries, dims).await?;
        }

        tx.commit().await?;
        debug!(document_id, removed, "index replace committed");
        Ok(removed)
    }

    /// Remove every entry of a document. Unknown ids remove nothing.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM index_entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        forget_dims_if_empty(&mut tx).await?;

        tx.commit().await?;
        Ok(removed)
    }

    /// Top-`k` entries by cosine similarity to `query`.
    ///
    /// Ordered by score descending, then lower ordinal, then earlier
    /// insertion. `document_id` restricts the search to one document.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension().await? {
            if query.len() != expected {
                return Err(RetrievalError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let rows = match document_id {
            Some(id) => {
                sqlx::query(
                    "SELECT seq, chunk_id, document_id, ordinal, total_chunks, text, embedding \
                     FROM index_entries WHERE document_id = ?",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT seq, chunk_id, document_id, ordinal, total_chunks, text, embedding \
                     FROM index_entries",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored: Vec<(i64, SearchHit)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let hit = SearchHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    ordinal: row.get::<i64, _>("ordinal") as usize,
                    total_chunks: row.get::<i64, _>("total_chunks") as usize,
                    text: row.get("text"),
                    score: cosine_similarity(query, &vector) as f64,
                };
                (row.get::<i64, _>("seq"), hit)
            })
            .collect();

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .total_cmp(&a.score)
                .then(a.ordinal.cmp(&b.ordinal))
                .then(seq_a.cmp(seq_b))
        });

        Ok(scored.into_iter().take(k).map(|(_, hit)| hit).collect())
    }

    /// All entries of a document, ordered by ordinal.
    pub async fn entries_for_document(&self, document_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            "SELECT chunk_id, document_id, ordinal, total_chunks, start_offset, end_offset, text, \
             content_hash, created_at, embedding \
             FROM index_entries WHERE document_id = ? ORDER BY ordinal ASC, seq ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexEntry {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    ordinal: row.get::<i64, _>("ordinal") as usize,
                    total_chunks: row.get::<i64, _>("total_chunks") as usize,
                    start: row.get::<i64, _>("start_offset") as usize,
                    end: row.get::<i64, _>("end_offset") as usize,
                    text: row.get("text"),
                    content_hash: row.get("content_hash"),
                    created_at: row.get("created_at"),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    pub async fn count_for_document(&self, document_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    pub async fn statistics(&self) -> Result<IndexStatistics> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COUNT(DISTINCT document_id) AS documents FROM index_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStatistics {
            total_entries: row.get::<i64, _>("entries") as usize,
            total_documents: row.get::<i64, _>("documents") as usize,
            dimension: self.dimension().await?,
        })
    }

    /// Remove every entry and forget the established dimensionality.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        info!(path = %self.path.display(), "index reset");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn open_verified(path: &Path) -> std::result::Result<SqlitePool, String> {
    let pool = db::connect(path).await.map_err(|e| e.to_string())?;
    match verify(&pool).await {
        Ok(()) => Ok(pool),
        Err(reason) => {
            pool.close().await;
            Err(reason)
        }
    }
}

async fn verify(pool: &SqlitePool) -> std::result::Result<(), String> {
    let check: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await
        .map_err(|e| format!("quick_check failed: {}", e))?;
    if check != "ok" {
        return Err(format!("quick_check reported: {}", check));
    }

    migrate::migrate_index(pool)
        .await
        .map_err(|e| format!("schema migration failed: {}", e))?;

    sqlx::query(
        "SELECT seq, chunk_id, document_id, ordinal, total_chunks, start_offset, end_offset, \
         text, content_hash, created_at, embedding, dims FROM index_entries LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(|e| format!("schema mismatch: {}", e))?;

    let bad: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM index_entries \
         WHERE length(embedding) != dims * 4 \
            OR dims != COALESCE((SELECT CAST(value AS INTEGER) FROM index_meta WHERE key = 'dims'), dims)",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| format!("vector check failed: {}", e))?;
    if bad > 0 {
        return Err(format!("{} entries have malformed vectors", bad));
    }

    Ok(())
}

/// Move a corrupted index file aside; its WAL and shared-memory files are
/// discarded.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let ts = chrono::Utc::now().timestamp();
    let target = PathBuf::from(format!("{}.corrupt-{}", path.display(), ts));
    std::fs::rename(path, &target)?;

    for suffix in ["-wal", "-shm"] {
        let side = PathBuf::from(format!("{}{}", path.display(), suffix));
        match std::fs::remove_file(&side) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(target)
}

/// Resolve the dimensionality a batch must have, establishing it if the
/// index is empty.
async fn establish_dims(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entries: &[IndexEntry],
) -> Result<usize> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
        .fetch_one(&mut **tx)
        .await?;

    let recorded: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(META_DIMS)
            .fetch_optional(&mut **tx)
            .await?;

    let expected = match recorded.and_then(|v| v.parse::<usize>().ok()) {
        Some(dims) if existing > 0 => dims,
        _ => entries[0].vector.len(),
    };
    if expected == 0 {
        return Err(RetrievalError::InvalidInput(
            "cannot index zero-length vectors".to_string(),
        ));
    }

    if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
        error!(
            chunk_id = %bad.chunk_id,
            expected,
            actual = bad.vector.len(),
            "invariant violated: vector dimensionality differs from index"
        );
        return Err(RetrievalError::DimensionMismatch {
            expected,
            actual: bad.vector.len(),
        });
    }

    sqlx::query(
        "INSERT INTO index_meta (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(META_DIMS)
    .bind(expected.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(expected)
}

async fn forget_dims_if_empty(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
        .fetch_one(&mut **tx)
        .await?;
    if remaining == 0 {
        sqlx::query("DELETE FROM index_meta WHERE key = ?")
            .bind(META_DIMS)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn write_entries(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entries: Vec<IndexEntry>,
    dims: usize,
) -> Result<usize> {
    let count = entries.len();
    for mut entry in entries {
        normalize_l2(&mut entry.vector);
        sqlx::query(
            r#"
            INSERT INTO index_entries (chunk_id, document_id, ordinal, total_chunks,
                                       start_offset, end_offset, text, content_hash,
                                       created_at, embedding, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                ordinal = excluded.ordinal,
                total_chunks = excluded.total_chunks,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                text = excluded.text,
                content_hash = excluded.content_hash,
                created_at = excluded.created_at,
                embedding = excluded.embedding,
                dims = excluded.dims
            "#,
        )
        .bind(&entry.chunk_id)
        .bind(&entry.document_id)
        .bind(entry.ordinal as i64)
        .bind(entry.total_chunks as i64)
        .bind(entry.start as i64)
        .bind(entry.end as i64)
        .bind(&entry.text)
        .bind(&entry.content_hash)
        .bind(entry.created_at)
        .bind(vec_to_blob(&entry.vector))
        .bind(dims as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(count)
}
