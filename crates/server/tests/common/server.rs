//! Server test utilities.

use std::path::PathBuf;
use std::sync::Arc;
use strata_catalog::{CatalogStore, SqliteStore};
use strata_core::config::{AppConfig, TierConfig};
use strata_core::hash::ContentHash;
use strata_server::{AppState, create_router};
use strata_storage::{NoopReleaser, TierSet};
use tempfile::TempDir;

/// The raw token matching `OrchestratorConfig::for_testing()`.
#[allow(dead_code)]
pub const TEST_TOKEN: &str = "test-orchestrator-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub catalog: Arc<SqliteStore>,
    pub ephemeral_root: PathBuf,
    pub persistent_root: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with temporary tiers and a SQLite catalog.
    pub async fn new() -> Self {
        let mut config = AppConfig::for_testing();
        // Tests stage files directly, so no grace shielding
        config.sync.orphan_grace_secs = 0;
        Self::with_config(config).await
    }

    /// Create a test server with a caller-tweaked configuration; tier and
    /// catalog paths are always replaced with temporary ones.
    pub async fn with_config(mut config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let ephemeral_root = temp_dir.path().join("ephemeral");
        let persistent_root = temp_dir.path().join("persistent");

        config.tiers = TierConfig {
            ephemeral_root: ephemeral_root.clone(),
            persistent_root: Some(persistent_root.clone()),
        };

        let tiers = Arc::new(
            TierSet::from_config(&config.tiers)
                .await
                .expect("Failed to create tiers"),
        );

        let catalog = Arc::new(
            SqliteStore::new(temp_dir.path().join("catalog.db"))
                .await
                .expect("Failed to create catalog store"),
        );

        let state = AppState::new(
            config,
            tiers,
            catalog.clone() as Arc<dyn CatalogStore>,
            Arc::new(NoopReleaser),
        )
        .expect("Failed to create app state");

        let router = create_router(state.clone());

        Self {
            router,
            state,
            catalog,
            ephemeral_root,
            persistent_root,
            _temp_dir: temp_dir,
        }
    }

    /// Insert an active catalog record for `content`.
    pub async fn seed_catalog(&self, storage_ref: &str, content: &[u8]) {
        self.catalog
            .upsert_record(
                storage_ref,
                &ContentHash::compute(content).to_hex(),
                content.len() as i64,
                None,
            )
            .await
            .expect("Failed to seed catalog");
    }

    /// Drop a blob directly into the ephemeral tier.
    pub async fn put_ephemeral(&self, rel: &str, content: &[u8]) {
        let path = self.ephemeral_root.join("files").join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    /// Drop a blob directly into the persistent tier.
    pub async fn put_persistent(&self, rel: &str, content: &[u8]) {
        let path = self.persistent_root.join("files").join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }
}
