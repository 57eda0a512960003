//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::ratelimit::{
    ip_guard_middleware, ops_rate_limit_middleware, sync_rate_limit_middleware,
};
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Layer order per request: TraceLayer, then the IP guard (allow-list +
/// per-IP limiter), then bearer auth, then the per-operation limiter,
/// then the handler. The health probe sits outside auth and the
/// operation limiters but behind the IP guard.
pub fn create_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/internal/sync", post(handlers::trigger_sync))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            sync_rate_limit_middleware,
        ));

    let ops_routes = Router::new()
        .route("/internal/storage/cleanup", post(handlers::storage_cleanup))
        .route("/internal/prepare-rotation", post(handlers::prepare_rotation))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ops_rate_limit_middleware,
        ));

    let protected = sync_routes
        .merge(ops_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let router = Router::new()
        .route("/internal/health", get(handlers::health_check))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ip_guard_middleware,
        ));

    let router = if state.config.server.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router.with_state(state)
}
