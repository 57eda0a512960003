//! Internal orchestrator endpoints.
//!
//! These trigger batch passes synchronously: the orchestrator wants the
//! report, and the passes are deadline-bounded so a request can never
//! hang forever.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use strata_storage::{
    CleanupFailure, ReconciliationService, RotationCoordinator, RotationReport, SyncCoordinator,
};

/// Response for `POST /internal/sync`.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    pub files_synced: usize,
    pub files_rejected: usize,
    pub files_deleted: usize,
    pub errors: Vec<String>,
}

/// Trigger one tier synchronization pass.
pub async fn trigger_sync(State(state): State<AppState>) -> ApiResult<Json<SyncResponse>> {
    let coordinator =
        SyncCoordinator::new(&state.tiers, state.catalog.clone(), state.config.sync.clone());
    let report = coordinator.run().await?;

    Ok(Json(SyncResponse {
        status: if report.degraded { "degraded" } else { "ok" },
        files_synced: report.files_synced,
        files_rejected: report.files_rejected,
        files_deleted: report.files_deleted,
        errors: report.errors,
    }))
}

/// Request body for `POST /internal/storage/cleanup`.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Response for `POST /internal/storage/cleanup`.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub status: &'static str,
    pub dry_run: bool,
    pub deleted_ephemeral: Vec<String>,
    pub deleted_persistent: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

/// Run (or dry-run) an orphan cleanup pass.
pub async fn storage_cleanup(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> ApiResult<Json<CleanupResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let reconciler = ReconciliationService::new(
        &state.tiers,
        state.catalog.clone(),
        state.config.sync.orphan_grace(),
    );
    let report = reconciler.cleanup_orphans(request.dry_run).await?;

    Ok(Json(CleanupResponse {
        status: if report.failed.is_empty() { "ok" } else { "partial" },
        dry_run: report.dry_run,
        deleted_ephemeral: report.deleted_ephemeral,
        deleted_persistent: report.deleted_persistent,
        failed: report.failed,
    }))
}

/// Run the pre-rotation phase sequence and return the full report.
///
/// The report is returned even when verification fails; deciding whether
/// rotation proceeds is the orchestrator's call.
pub async fn prepare_rotation(State(state): State<AppState>) -> ApiResult<Json<RotationReport>> {
    let coordinator = RotationCoordinator::new(
        &state.tiers,
        state.catalog.clone(),
        state.releaser.clone(),
        state.config.rotation.clone(),
    );
    let report = coordinator.run().await?;
    Ok(Json(report))
}

/// Response for `GET /internal/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub catalog: &'static str,
    pub persistent_tier: bool,
}

/// Readiness probe. Not behind the bearer-token layer so load balancers
/// can reach it.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let catalog_ok = state.catalog.health_check().await.is_ok();
    Json(HealthResponse {
        status: if catalog_ok { "ok" } else { "degraded" },
        catalog: if catalog_ok { "ok" } else { "unavailable" },
        persistent_tier: state.tiers.persistent.is_some(),
    })
}
