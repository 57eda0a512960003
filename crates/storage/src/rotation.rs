//! Pre-rotation coordination.
//!
//! One run walks a fixed phase sequence and always hands a full report
//! back to the orchestrator; the orchestrator decides whether rotation
//! proceeds.

use crate::error::StorageResult;
use crate::promote::{PromotionOutcome, PromotionService};
use crate::releaser::CacheReleaser;
use crate::tier::TierSet;
use crate::validate::{CATALOG_ATTEMPTS, ValidationService, Verdict};
use serde::Serialize;
use std::sync::Arc;
use strata_catalog::{CatalogStore, with_retry};
use strata_core::StorageRef;
use strata_core::config::RotationConfig;
use tokio::time::Instant;
use tracing::instrument;

/// Phase the run ended in. `Done` means every phase completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    Validating,
    Promoting,
    ReleasingCaches,
    Verifying,
    Done,
}

/// A per-blob operation that did not settle cleanly during rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationFailure {
    pub storage_ref: String,
    pub outcome: String,
}

/// Full account of one rotation run.
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub phase: RotationPhase,
    pub validated: usize,
    pub deleted_suspicious: usize,
    /// Suspicious blobs that survived because their delete failed. They
    /// get another chance on the next pass; meanwhile the orchestrator
    /// sees them here.
    pub delete_failures: Vec<RotationFailure>,
    pub promoted: usize,
    pub promotion_failures: Vec<RotationFailure>,
    pub cache_release_ok: bool,
    pub missing_count: usize,
    pub missing_pct: f64,
    pub verification_ok: bool,
    /// Set when the deadline expired before all phases finished.
    pub degraded: bool,
    pub overall_success: bool,
}

impl RotationReport {
    fn empty() -> Self {
        Self {
            phase: RotationPhase::Validating,
            validated: 0,
            deleted_suspicious: 0,
            delete_failures: Vec::new(),
            promoted: 0,
            promotion_failures: Vec::new(),
            cache_release_ok: false,
            missing_count: 0,
            missing_pct: 0.0,
            verification_ok: false,
            degraded: false,
            overall_success: false,
        }
    }
}

/// Runs the pre-rotation phase sequence:
/// validate, promote, release caches, verify coverage.
pub struct RotationCoordinator<'a> {
    tiers: &'a TierSet,
    catalog: Arc<dyn CatalogStore>,
    validation: ValidationService,
    releaser: Arc<dyn CacheReleaser>,
    config: RotationConfig,
}

impl<'a> RotationCoordinator<'a> {
    pub fn new(
        tiers: &'a TierSet,
        catalog: Arc<dyn CatalogStore>,
        releaser: Arc<dyn CacheReleaser>,
        config: RotationConfig,
    ) -> Self {
        Self {
            tiers,
            validation: ValidationService::new(catalog.clone()),
            catalog,
            releaser,
            config,
        }
    }

    /// Run one rotation pass.
    ///
    /// Errors only when the catalog stays unreachable after retries;
    /// everything per-file lands in the report instead.
    #[instrument(skip(self))]
    pub async fn run(&self) -> StorageResult<RotationReport> {
        let deadline = Instant::now() + self.config.deadline();
        let mut report = RotationReport::empty();

        let whitelist = self.validation.load_whitelist().await?;

        // Validating: unknown data never survives rotation
        report.phase = RotationPhase::Validating;
        let blobs = self.tiers.ephemeral.list_blobs().await?;
        let mut queued: Vec<StorageRef> = Vec::new();
        for blob in blobs {
            if Instant::now() >= deadline {
                report.degraded = true;
                break;
            }
            report.validated += 1;
            match self.validation.judge(&whitelist, &blob.rel, &blob.path).await {
                Verdict::Legitimate => {
                    // Verified legitimate implies a parseable ref
                    if let Ok(storage_ref) = StorageRef::parse(&blob.rel) {
                        queued.push(storage_ref);
                    }
                }
                Verdict::Suspicious(reason) => {
                    tracing::warn!(
                        security = true,
                        storage_ref = blob.rel,
                        reason = reason.as_str(),
                        "Deleting suspicious blob before rotation"
                    );
                    match self.tiers.ephemeral.delete(&blob.rel).await {
                        Ok(_) => report.deleted_suspicious += 1,
                        Err(e) => report.delete_failures.push(RotationFailure {
                            storage_ref: blob.rel.clone(),
                            outcome: format!("delete failed: {e}"),
                        }),
                    }
                }
            }
        }

        // Promoting
        if !report.degraded {
            report.phase = RotationPhase::Promoting;
            if let Some(persistent) = &self.tiers.persistent {
                let promoter = PromotionService::new(&self.tiers.ephemeral, persistent);
                for storage_ref in &queued {
                    if Instant::now() >= deadline {
                        report.degraded = true;
                        break;
                    }
                    match promoter.promote(&whitelist, storage_ref).await {
                        PromotionOutcome::Promoted | PromotionOutcome::AlreadyPromoted => {
                            report.promoted += 1;
                        }
                        PromotionOutcome::SourceMissing => {}
                        outcome => report.promotion_failures.push(RotationFailure {
                            storage_ref: storage_ref.to_string(),
                            outcome: outcome.label().to_string(),
                        }),
                    }
                }
            }
        }

        // ReleasingCaches: failure is recorded, never fatal
        if !report.degraded {
            report.phase = RotationPhase::ReleasingCaches;
            report.cache_release_ok = match self.releaser.release_caches().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache release failed during rotation");
                    false
                }
            };
        }

        // Verifying: every active catalog entry must be on some tier. A
        // fresh ref listing (not the whitelist snapshot from the start of
        // the run) keeps entries soft-deleted mid-run from counting as
        // missing.
        if !report.degraded {
            report.phase = RotationPhase::Verifying;
            let refs = with_retry(CATALOG_ATTEMPTS, || self.catalog.list_all_refs()).await?;
            let mut active = 0usize;
            for row in &refs {
                if Instant::now() >= deadline {
                    report.degraded = true;
                    break;
                }
                if row.deleted_at.is_some() {
                    continue;
                }
                active += 1;
                let present = match StorageRef::parse(&row.storage_ref) {
                    Ok(storage_ref) => {
                        let on_ephemeral =
                            self.tiers.ephemeral.exists(&storage_ref).await.unwrap_or(false);
                        let on_persistent = match &self.tiers.persistent {
                            Some(tier) => tier.exists(&storage_ref).await.unwrap_or(false),
                            None => false,
                        };
                        on_ephemeral || on_persistent
                    }
                    // A ref the tiers refuse to resolve cannot be on disk
                    Err(_) => false,
                };
                if !present {
                    report.missing_count += 1;
                }
            }
            report.missing_pct = if active == 0 {
                0.0
            } else {
                report.missing_count as f64 * 100.0 / active as f64
            };
            report.verification_ok =
                !report.degraded && report.missing_pct <= self.config.missing_tolerance_pct;
        }

        if !report.degraded {
            report.phase = RotationPhase::Done;
        }
        report.overall_success = !report.degraded
            && report.promotion_failures.is_empty()
            && report.cache_release_ok
            && report.verification_ok;

        tracing::info!(
            phase = ?report.phase,
            validated = report.validated,
            promoted = report.promoted,
            missing_pct = report.missing_pct,
            success = report.overall_success,
            "Rotation pass finished"
        );
        Ok(report)
    }
}
