//! Read-only file catalog access for Strata.
//!
//! The catalog is the authoritative table of file records; this crate
//! exposes the two projections the lifecycle core consumes:
//! - non-deleted records as (storage_ref, hash, size) for validation
//! - all refs with their deletion markers for coverage verification
//!
//! Strata never writes to the catalog.

pub mod error;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::{CatalogError, CatalogResult};
pub use models::{FileRecordRow, FileRefRow};
pub use postgres::PostgresStore;
pub use store::{CatalogStore, SqliteStore, with_retry};

use std::sync::Arc;
use strata_core::config::CatalogConfig;

/// Create a catalog store from configuration.
pub async fn from_config(config: &CatalogConfig) -> CatalogResult<Arc<dyn CatalogStore>> {
    config.validate().map_err(CatalogError::Config)?;

    match config {
        CatalogConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
        CatalogConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL catalog using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(CatalogError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
    }
}
