//! Document catalog: one row per uploaded document, including the
//! normalized text the index was built from.
//!
//! Keeping the source text here is what makes the index disposable: after a
//! corrupted index is quarantined, or after the embedding model changes,
//! [`crate::coordinator::RetrievalCoordinator::rebuild_index`] re-chunks and
//! re-embeds every completed document from this table.

use std::path::Path;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::migrate;
use crate::models::{DocumentRecord, DocumentStatus, IngestionStage, StoredDocument};

const RECORD_COLUMNS: &str = "id, filename, content_type, content_hash, status, chunk_count, \
     failure_stage, failure_reason, char_count, word_count, created_at, updated_at";

pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_catalog(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", RECORD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    /// Record plus retained text.
    pub async fn get_with_text(&self, id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {}, body FROM documents WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredDocument {
            record: record_from_row(&row),
            text: row.get("body"),
        }))
    }

    /// Insert or update a record. `text = None` keeps the stored text.
    pub async fn upsert(&self, record: &DocumentRecord, text: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content_type, content_hash, status, chunk_count,
                                   failure_stage, failure_reason, char_count, word_count,
                                   body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, ''), ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                content_hash = excluded.content_hash,
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                failure_stage = excluded.failure_stage,
                failure_reason = excluded.failure_reason,
                char_count = excluded.char_count,
                word_count = excluded.word_count,
                body = COALESCE(?, documents.body),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(&record.content_hash)
        .bind(record.status.as_str())
        .bind(record.chunk_count as i64)
        .bind(record.failure_stage.map(|s| s.as_str()))
        .bind(&record.failure_reason)
        .bind(record.char_count as i64)
        .bind(record.word_count as i64)
        .bind(text)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a document deleted and drop its retained text.
    ///
    /// Returns false if the id was never cataloged.
    pub async fn mark_deleted(&self, id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE documents SET status = ?, chunk_count = 0, body = '', updated_at = ? WHERE id = ?",
        )
        .bind(DocumentStatus::Deleted.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All documents not marked deleted, most recently updated first.
    pub async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE status != ? ORDER BY updated_at DESC, id ASC",
            RECORD_COLUMNS
        ))
        .bind(DocumentStatus::Deleted.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Ids of completed documents, in id order.
    pub async fn completed_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents WHERE status = ? ORDER BY id ASC")
            .bind(DocumentStatus::Completed.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn reset(&self) -> Result<()> {
        let removed = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(removed, "catalog reset");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn record_from_row(row: &SqliteRow) -> DocumentRecord {
    let status: String = row.get("status");
    let failure_stage: Option<String> = row.get("failure_stage");
    DocumentRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        content_hash: row.get("content_hash"),
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Failed),
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        failure_stage: failure_stage.as_deref().and_then(IngestionStage::parse),
        failure_reason: row.get("failure_reason"),
        char_count: row.get::<i64, _>("char_count") as usize,
        word_count: row.get::<i64, _>("word_count") as usize,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
