//! Orphan detection and cleanup across tiers.
//!
//! An orphan is a blob on disk with no non-deleted catalog record. Passes
//! are idempotent: deleting a just-soft-deleted blob is the intended
//! outcome, and a miss is corrected by the next run.

use crate::error::StorageResult;
use crate::tier::{FilesystemTier, TierSet};
use crate::validate::{ValidationService, Whitelist};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use strata_catalog::CatalogStore;
use strata_core::StorageRef;
use tracing::instrument;

/// Orphans found on each tier, with totals for context.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanReport {
    pub ephemeral_orphans: Vec<String>,
    pub persistent_orphans: Vec<String>,
    pub ephemeral_total: usize,
    pub persistent_total: usize,
}

impl OrphanReport {
    pub fn orphan_count(&self) -> usize {
        self.ephemeral_orphans.len() + self.persistent_orphans.len()
    }
}

/// One orphan that could not be deleted.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub tier: String,
    pub storage_ref: String,
    pub error: String,
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Deleted orphans, or deletion candidates when `dry_run` is set.
    pub deleted_ephemeral: Vec<String>,
    pub deleted_persistent: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted_ephemeral.len() + self.deleted_persistent.len()
    }
}

/// Diffs tier contents against the catalog and reaps orphans.
pub struct ReconciliationService<'a> {
    tiers: &'a TierSet,
    validation: ValidationService,
    /// Blobs younger than this are never treated as orphans: their
    /// catalog row may not be committed yet.
    orphan_grace: Duration,
}

impl<'a> ReconciliationService<'a> {
    pub fn new(
        tiers: &'a TierSet,
        catalog: Arc<dyn CatalogStore>,
        orphan_grace: Duration,
    ) -> Self {
        Self {
            tiers,
            validation: ValidationService::new(catalog),
            orphan_grace,
        }
    }

    async fn tier_orphans(
        &self,
        tier: &FilesystemTier,
        whitelist: &Whitelist,
    ) -> StorageResult<(Vec<String>, usize)> {
        let blobs = tier.list_blobs().await?;
        let total = blobs.len();
        let now = SystemTime::now();
        let mut orphans = Vec::new();

        for blob in blobs {
            let cataloged = StorageRef::parse(&blob.rel)
                .map(|r| whitelist.contains(&r))
                .unwrap_or(false);
            if cataloged {
                continue;
            }
            // Grace window: a blob can land on disk before its catalog
            // row commits
            if let Some(modified) = blob.modified
                && now.duration_since(modified).unwrap_or(Duration::ZERO) < self.orphan_grace
            {
                tracing::debug!(
                    tier = tier.label(),
                    storage_ref = blob.rel,
                    "Skipping recent uncataloged blob"
                );
                continue;
            }
            orphans.push(blob.rel);
        }

        orphans.sort();
        Ok((orphans, total))
    }

    /// Walk both tiers and report blobs with no active catalog record.
    #[instrument(skip(self))]
    pub async fn find_orphans(&self) -> StorageResult<OrphanReport> {
        let whitelist = self.validation.load_whitelist().await?;

        let (ephemeral_orphans, ephemeral_total) =
            self.tier_orphans(&self.tiers.ephemeral, &whitelist).await?;

        let (persistent_orphans, persistent_total) = match &self.tiers.persistent {
            Some(tier) => self.tier_orphans(tier, &whitelist).await?,
            None => (Vec::new(), 0),
        };

        Ok(OrphanReport {
            ephemeral_orphans,
            persistent_orphans,
            ephemeral_total,
            persistent_total,
        })
    }

    /// Delete (or, under `dry_run`, merely report) every orphan.
    ///
    /// Deletions are independent per file; a failure is recorded and the
    /// pass moves on.
    #[instrument(skip(self))]
    pub async fn cleanup_orphans(&self, dry_run: bool) -> StorageResult<CleanupReport> {
        let orphans = self.find_orphans().await?;
        let mut report = CleanupReport {
            dry_run,
            deleted_ephemeral: Vec::new(),
            deleted_persistent: Vec::new(),
            failed: Vec::new(),
        };

        if dry_run {
            report.deleted_ephemeral = orphans.ephemeral_orphans;
            report.deleted_persistent = orphans.persistent_orphans;
            return Ok(report);
        }

        for rel in orphans.ephemeral_orphans {
            match self.tiers.ephemeral.delete(&rel).await {
                Ok(_) => report.deleted_ephemeral.push(rel),
                Err(e) => report.failed.push(CleanupFailure {
                    tier: "ephemeral".to_string(),
                    storage_ref: rel,
                    error: e.to_string(),
                }),
            }
        }

        if let Some(tier) = &self.tiers.persistent {
            for rel in orphans.persistent_orphans {
                match tier.delete(&rel).await {
                    Ok(_) => report.deleted_persistent.push(rel),
                    Err(e) => report.failed.push(CleanupFailure {
                        tier: "persistent".to_string(),
                        storage_ref: rel,
                        error: e.to_string(),
                    }),
                }
            }
        }

        tracing::info!(
            deleted = report.deleted_count(),
            failed = report.failed.len(),
            "Orphan cleanup pass finished"
        );
        Ok(report)
    }

    /// Delete orphans on the persistent tier only.
    ///
    /// Sync's trailing pass uses this; its ephemeral walk has already
    /// removed suspicious blobs under the same grace rule, so touching
    /// the ephemeral tier again would only race files landing mid-pass.
    #[instrument(skip(self))]
    pub async fn cleanup_persistent_orphans(&self) -> StorageResult<CleanupReport> {
        let mut report = CleanupReport {
            dry_run: false,
            deleted_ephemeral: Vec::new(),
            deleted_persistent: Vec::new(),
            failed: Vec::new(),
        };
        let Some(tier) = &self.tiers.persistent else {
            return Ok(report);
        };

        let whitelist = self.validation.load_whitelist().await?;
        let (orphans, _) = self.tier_orphans(tier, &whitelist).await?;
        for rel in orphans {
            match tier.delete(&rel).await {
                Ok(_) => report.deleted_persistent.push(rel),
                Err(e) => report.failed.push(CleanupFailure {
                    tier: "persistent".to_string(),
                    storage_ref: rel,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            deleted = report.deleted_count(),
            failed = report.failed.len(),
            "Persistent orphan cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    async fn put_blob(tier: &FilesystemTier, rel: &str, content: &[u8]) {
        let path = tier.root().join("files").join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_orphans_diffs_disk_against_catalog() {
        let s = setup().await;
        seed(&s.catalog, "a", b"alpha").await;
        put_blob(&s.tiers.ephemeral, "a", b"alpha").await;
        put_blob(&s.tiers.ephemeral, "z", b"stray").await;

        let svc = ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::ZERO);
        let report = svc.find_orphans().await.unwrap();

        assert_eq!(report.ephemeral_orphans, vec!["z".to_string()]);
        assert!(report.persistent_orphans.is_empty());
        assert_eq!(report.ephemeral_total, 2);
    }

    #[tokio::test]
    async fn test_soft_deleted_blob_becomes_orphan() {
        let s = setup().await;
        seed(&s.catalog, "doomed", b"data").await;
        put_blob(s.tiers.persistent.as_ref().unwrap(), "doomed", b"data").await;
        s.catalog.soft_delete_record("doomed").await.unwrap();

        let svc = ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::ZERO);
        let report = svc.find_orphans().await.unwrap();
        assert_eq!(report.persistent_orphans, vec!["doomed".to_string()]);
    }

    #[tokio::test]
    async fn test_grace_period_shields_fresh_blobs() {
        let s = setup().await;
        put_blob(&s.tiers.ephemeral, "just-uploaded", b"x").await;

        let svc =
            ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::from_secs(3600));
        let report = svc.find_orphans().await.unwrap();
        assert!(report.ephemeral_orphans.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let s = setup().await;
        put_blob(&s.tiers.ephemeral, "stray", b"x").await;

        let svc = ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::ZERO);
        let dry = svc.cleanup_orphans(true).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.deleted_ephemeral, vec!["stray".to_string()]);
        assert!(s.tiers.ephemeral.root().join("files/stray").exists());

        // A real run deletes the same set
        let wet = svc.cleanup_orphans(false).await.unwrap();
        assert_eq!(wet.deleted_ephemeral, dry.deleted_ephemeral);
        assert!(!s.tiers.ephemeral.root().join("files/stray").exists());
    }

    #[tokio::test]
    async fn test_persistent_only_cleanup_leaves_ephemeral_alone() {
        let s = setup().await;
        put_blob(&s.tiers.ephemeral, "eph-stray", b"x").await;
        put_blob(s.tiers.persistent.as_ref().unwrap(), "per-stray", b"y").await;

        let svc = ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::ZERO);
        let report = svc.cleanup_persistent_orphans().await.unwrap();

        assert_eq!(report.deleted_persistent, vec!["per-stray".to_string()]);
        assert!(report.deleted_ephemeral.is_empty());
        assert!(s.tiers.ephemeral.root().join("files/eph-stray").exists());
        assert!(
            !s.tiers.persistent.as_ref().unwrap().root().join("files/per-stray").exists()
        );
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let s = setup().await;
        put_blob(&s.tiers.ephemeral, "stray", b"x").await;

        let svc = ReconciliationService::new(&s.tiers, s.catalog.clone(), Duration::ZERO);
        svc.cleanup_orphans(false).await.unwrap();
        let second = svc.cleanup_orphans(false).await.unwrap();
        assert_eq!(second.deleted_count(), 0);
        assert!(second.failed.is_empty());
    }
}
