//! Tier synchronization pass.
//!
//! One pass walks the ephemeral `files/` tree, promotes catalog-verified
//! blobs to the persistent tier, deletes suspicious ones, then reaps
//! persistent-tier orphans. Safe to trigger from multiple sources; a
//! pass never depends on the previous one having completed.

use crate::error::StorageResult;
use crate::promote::{PromotionOutcome, PromotionService};
use crate::reconcile::ReconciliationService;
use crate::tier::TierSet;
use crate::validate::{SuspicionReason, ValidationService, Verdict};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use strata_catalog::CatalogStore;
use strata_core::StorageRef;
use strata_core::config::SyncConfig;
use tokio::time::Instant;
use tracing::instrument;

/// Counters from one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Blobs confirmed on the persistent tier (newly copied or already
    /// there).
    pub files_synced: usize,
    /// Suspicious blobs deleted from the ephemeral tier.
    pub files_rejected: usize,
    /// Persistent-tier orphans reaped by the trailing cleanup.
    pub files_deleted: usize,
    pub errors: Vec<String>,
    /// Set when the deadline expired mid-pass.
    pub degraded: bool,
}

/// Drives validate-promote-cleanup passes over the ephemeral tier.
pub struct SyncCoordinator<'a> {
    tiers: &'a TierSet,
    catalog: Arc<dyn CatalogStore>,
    validation: ValidationService,
    config: SyncConfig,
}

impl<'a> SyncCoordinator<'a> {
    pub fn new(tiers: &'a TierSet, catalog: Arc<dyn CatalogStore>, config: SyncConfig) -> Self {
        Self {
            tiers,
            validation: ValidationService::new(catalog.clone()),
            catalog,
            config,
        }
    }

    /// Run one full sync pass.
    ///
    /// Errors only when pass setup fails (catalog unreachable after
    /// retries); per-file trouble is accumulated in the report.
    #[instrument(skip(self))]
    pub async fn run(&self) -> StorageResult<SyncReport> {
        let deadline = Instant::now() + self.config.deadline();
        let grace = self.config.orphan_grace();
        let mut report = SyncReport {
            files_synced: 0,
            files_rejected: 0,
            files_deleted: 0,
            errors: Vec::new(),
            degraded: false,
        };

        let whitelist = self.validation.load_whitelist().await?;
        let blobs = self.tiers.ephemeral.list_blobs().await?;
        let now = SystemTime::now();

        for blob in blobs {
            if Instant::now() >= deadline {
                report.degraded = true;
                break;
            }

            match self.validation.judge(&whitelist, &blob.rel, &blob.path).await {
                Verdict::Legitimate => {
                    let Some(persistent) = &self.tiers.persistent else {
                        // Single-tier deployment: verified files simply stay
                        continue;
                    };
                    let Ok(storage_ref) = StorageRef::parse(&blob.rel) else {
                        continue;
                    };
                    let promoter = PromotionService::new(&self.tiers.ephemeral, persistent);
                    match promoter.promote(&whitelist, &storage_ref).await {
                        PromotionOutcome::Promoted | PromotionOutcome::AlreadyPromoted => {
                            report.files_synced += 1;
                        }
                        PromotionOutcome::SourceMissing => {}
                        outcome => report
                            .errors
                            .push(format!("{}: {}", blob.rel, outcome.label())),
                    }
                }
                Verdict::Suspicious(reason) => {
                    // An uncataloged blob inside the grace window may be an
                    // upload whose catalog row has not committed yet
                    if reason == SuspicionReason::NotInCatalog
                        && let Some(modified) = blob.modified
                        && now.duration_since(modified).unwrap_or(Duration::ZERO) < grace
                    {
                        continue;
                    }
                    tracing::warn!(
                        security = true,
                        storage_ref = blob.rel,
                        reason = reason.as_str(),
                        "Deleting suspicious blob from ephemeral tier"
                    );
                    match self.tiers.ephemeral.delete(&blob.rel).await {
                        Ok(_) => report.files_rejected += 1,
                        Err(e) => report.errors.push(format!("{}: delete: {e}", blob.rel)),
                    }
                }
            }
        }

        if report.degraded {
            tracing::warn!("Sync pass deadline expired, skipping orphan cleanup");
            return Ok(report);
        }

        let reconciler =
            ReconciliationService::new(self.tiers, self.catalog.clone(), grace);
        match reconciler.cleanup_persistent_orphans().await {
            Ok(cleanup) => {
                report.files_deleted = cleanup.deleted_count();
                report
                    .errors
                    .extend(cleanup.failed.into_iter().map(|f| {
                        format!("{}/{}: {}", f.tier, f.storage_ref, f.error)
                    }));
            }
            Err(e) => report.errors.push(format!("orphan cleanup: {e}")),
        }

        tracing::info!(
            synced = report.files_synced,
            rejected = report.files_rejected,
            deleted = report.files_deleted,
            errors = report.errors.len(),
            "Sync pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::FilesystemTier;
    use strata_catalog::SqliteStore;
    use strata_core::hash::ContentHash;
    use tempfile::tempdir;

    struct Setup {
        _dirs: (tempfile::TempDir, tempfile::TempDir, tempfile::TempDir),
        tiers: TierSet,
        catalog: Arc<SqliteStore>,
    }

    async fn setup() -> Setup {
        let eph = tempdir().unwrap();
        let per = tempdir().unwrap();
        let db = tempdir().unwrap();
        let tiers = TierSet {
            ephemeral: FilesystemTier::new("ephemeral", eph.path()).await.unwrap(),
            persistent: Some(FilesystemTier::new("persistent", per.path()).await.unwrap()),
        };
        let catalog = Arc::new(SqliteStore::new(db.path().join("c.db")).await.unwrap());
        Setup {
            _dirs: (eph, per, db),
            tiers,
            catalog,
        }
    }

    async fn seed(catalog: &SqliteStore, storage_ref: &str, content: &[u8]) {
        catalog
            .upsert_record(
                storage_ref,
                &ContentHash::compute(content).to_hex(),
                content.len() as i64,
                None,
            )
            .await
            .unwrap();
    }

    async fn put_ephemeral(tiers: &TierSet, rel: &str, content: &[u8]) {
        let path = tiers.ephemeral.root().join("files").join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    fn no_grace() -> SyncConfig {
        SyncConfig {
            orphan_grace_secs: 0,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sync_promotes_legitimate_and_deletes_suspicious() {
        let s = setup().await;
        seed(&s.catalog, "f1", b"hello").await;
        put_ephemeral(&s.tiers, "f1", b"hello").await;
        put_ephemeral(&s.tiers, "f2", b"evil").await;

        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), no_grace());
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.files_synced, 1);
        assert_eq!(report.files_rejected, 1);
        assert!(report.errors.is_empty());

        let persistent = s.tiers.persistent.as_ref().unwrap();
        assert_eq!(
            tokio::fs::read(persistent.root().join("files/f1")).await.unwrap(),
            b"hello"
        );
        assert!(!s.tiers.ephemeral.root().join("files/f2").exists());
        assert!(!persistent.root().join("files/f2").exists());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let s = setup().await;
        seed(&s.catalog, "f1", b"hello").await;
        put_ephemeral(&s.tiers, "f1", b"hello").await;

        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), no_grace());
        let first = coordinator.run().await.unwrap();
        let second = coordinator.run().await.unwrap();

        assert_eq!(first.files_synced, 1);
        assert_eq!(second.files_synced, 1);
        assert_eq!(second.files_rejected, 0);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_sync_reaps_persistent_orphans() {
        let s = setup().await;
        let persistent = s.tiers.persistent.as_ref().unwrap();
        tokio::fs::write(persistent.root().join("files/ghost"), b"old").await.unwrap();

        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), no_grace());
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.files_deleted, 1);
        assert!(!persistent.root().join("files/ghost").exists());
    }

    #[tokio::test]
    async fn test_grace_window_spares_fresh_uncataloged_blobs() {
        let s = setup().await;
        put_ephemeral(&s.tiers, "in-flight", b"new upload").await;

        let config = SyncConfig {
            orphan_grace_secs: 3600,
            ..SyncConfig::default()
        };
        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), config);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.files_rejected, 0);
        assert_eq!(report.files_deleted, 0);
        assert!(s.tiers.ephemeral.root().join("files/in-flight").exists());
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_rejected_despite_grace() {
        let s = setup().await;
        seed(&s.catalog, "doc", b"expected").await;
        put_ephemeral(&s.tiers, "doc", b"tampered").await;

        let config = SyncConfig {
            orphan_grace_secs: 3600,
            ..SyncConfig::default()
        };
        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), config);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.files_rejected, 1);
        assert!(!s.tiers.ephemeral.root().join("files/doc").exists());
    }

    #[tokio::test]
    async fn test_expired_deadline_degrades() {
        let s = setup().await;
        seed(&s.catalog, "f1", b"x").await;
        put_ephemeral(&s.tiers, "f1", b"x").await;

        let config = SyncConfig {
            deadline_secs: 0,
            orphan_grace_secs: 0,
            ..SyncConfig::default()
        };
        let coordinator = SyncCoordinator::new(&s.tiers, s.catalog.clone(), config);
        let report = coordinator.run().await.unwrap();
        assert!(report.degraded);
        assert_eq!(report.files_synced, 0);
    }
}
