//! PostgreSQL-based catalog store implementation.

use crate::error::CatalogResult;
use crate::models::{FileRecordRow, FileRefRow};
use crate::store::CatalogStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use strata_core::config::PgSslMode;

/// PostgreSQL-based catalog store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Allows credentials to be passed separately, enabling better secret
    /// management (e.g., passwords via environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        let ssl = match ssl_mode.unwrap_or_default() {
            PgSslMode::Disable => SqlxPgSslMode::Disable,
            PgSslMode::Prefer => SqlxPgSslMode::Prefer,
            PgSslMode::Require => SqlxPgSslMode::Require,
        };
        opts = opts.ssl_mode(ssl);

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        // Server-side statement timeout so hung queries are cancelled by
        // PostgreSQL rather than stalling a whole batch pass.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", timeout_ms.to_string().as_str())]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
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
