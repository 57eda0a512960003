//! Catalog store trait and SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::models::{FileRecordRow, FileRefRow};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Read-only view of the authoritative file catalog.
///
/// The catalog is ground truth for which blobs are legitimate; this
/// subsystem never mutates it. Soft-deleted rows (`deleted_at` set) are
/// excluded from legitimacy but still visible through `list_all_refs` so
/// coverage verification can distinguish "deleted" from "missing".
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// List all non-deleted file records projected to
    /// (storage_ref, hash, size).
    async fn list_active_records(&self) -> CatalogResult<Vec<FileRecordRow>>;

    /// List every file reference with its deletion marker.
    async fn list_all_refs(&self) -> CatalogResult<Vec<FileRefRow>>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> CatalogResult<()>;
}

/// SQLite-based catalog store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) a SQLite catalog database.
    pub async fn new(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under test concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the file_records table if the database is fresh.
    ///
    /// The catalog schema is owned by the upload service; this exists so
    /// development and test deployments can start from an empty file.
    async fn ensure_schema(&self) -> CatalogResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_records (
                storage_ref TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                deleted_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Insert or update a file record.
    ///
    /// Seeding helper for tests and development tooling; the production
    /// catalog is written by the upload service, not by Strata.
    pub async fn upsert_record(
        &self,
        storage_ref: &str,
        content_hash: &str,
        size_bytes: i64,
        deleted_at: Option<time::OffsetDateTime>,
    ) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO file_records (storage_ref, content_hash, size_bytes, deleted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(storage_ref) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 size_bytes = excluded.size_bytes,
                 deleted_at = excluded.deleted_at",
        )
        .bind(storage_ref)
        .bind(content_hash)
        .bind(size_bytes)
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-delete a record by setting its deletion marker.
    ///
    /// Seeding helper for tests and development tooling.
    pub async fn soft_delete_record(&self, storage_ref: &str) -> CatalogResult<()> {
        sqlx::query("UPDATE file_records SET deleted_at = ?1 WHERE storage_ref = ?2")
            .bind(time::OffsetDateTime::now_utc())
            .bind(storage_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn list_active_records(&self) -> CatalogResult<Vec<FileRecordRow>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(
            "SELECT storage_ref, content_hash, size_bytes
             FROM file_records
             WHERE deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_all_refs(&self) -> CatalogResult<Vec<FileRefRow>> {
        let rows = sqlx::query_as::<_, FileRefRow>(
            "SELECT storage_ref, deleted_at FROM file_records",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn health_check(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Run a catalog query with bounded retry.
///
/// Retries live at the catalog-query boundary only: an incomplete
/// whitelist is worse than none, since it would misclassify legitimate
/// files as orphans, so callers abort the whole pass when this gives up.
pub async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> CatalogResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CatalogResult<T>>,
{
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Catalog query failed, retrying"
                );
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }
    }
    Err(CatalogError::Unavailable {
        attempts,
        last_error,
    })
}
