//! Rate limiting middleware.
//!
//! Two layers, both ahead of the handlers:
//! - a per-IP token bucket applied to every request
//! - per-operation buckets: the sync endpoint allows one trigger per
//!   configured interval, cleanup/rotation share a per-minute budget
//!
//! The per-operation buckets are global rather than keyed: the only
//! caller is the orchestrator, and the point is to protect the batch
//! passes from overlapping triggers, not to arbitrate between clients.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_core::config::RateLimitConfig;

/// Keyed limiter for per-IP budgets.
type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Unkeyed limiter for per-operation budgets.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

struct RateLimitStateInner {
    ip_limiter: KeyedLimiter,
    /// `None` when the sync interval is configured to zero.
    sync_limiter: Option<DirectLimiter>,
    ops_limiter: DirectLimiter,
    /// Whether the missing-ConnectInfo warning has been logged.
    connect_info_warned: AtomicBool,
}

/// Rate limiter state shared across requests. Cheap to clone.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

impl RateLimitState {
    /// Build limiter state from configuration. Disabled config yields an
    /// inert state that admits everything.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, String> {
        if !config.enabled {
            return Ok(Self { inner: None });
        }

        let per_ip = NonZeroU32::new(config.ip_requests_per_minute)
            .ok_or("rate_limit.ip_requests_per_minute must be positive when enabled")?;
        let per_op = NonZeroU32::new(config.ops_per_minute)
            .ok_or("rate_limit.ops_per_minute must be positive when enabled")?;

        let sync_limiter = if config.sync_min_interval_secs == 0 {
            None
        } else {
            let quota = Quota::with_period(Duration::from_secs(config.sync_min_interval_secs))
                .ok_or("rate_limit.sync_min_interval_secs is not a valid period")?;
            Some(RateLimiter::direct(quota))
        };

        Ok(Self {
            inner: Some(Arc::new(RateLimitStateInner {
                ip_limiter: RateLimiter::dashmap(Quota::per_minute(per_ip)),
                sync_limiter,
                ops_limiter: RateLimiter::direct(Quota::per_minute(per_op)),
                connect_info_warned: AtomicBool::new(false),
            })),
        })
    }

    /// Inert state for tests.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    fn client_ip(&self, req: &Request) -> Option<IpAddr> {
        match req.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Some(addr.ip()),
            None => {
                if let Some(inner) = &self.inner
                    && !inner.connect_info_warned.swap(true, Ordering::Relaxed)
                {
                    tracing::warn!(
                        "ConnectInfo missing; per-IP limits and allow-list are inactive"
                    );
                }
                None
            }
        }
    }
}

/// Per-IP guard: allow-list plus per-IP token bucket.
///
/// Runs before authentication so unauthenticated floods are shed early.
pub async fn ip_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(ip) = state.rate_limit.client_ip(&req) {
        if !state.allow_list.is_empty() && !state.allow_list.iter().any(|net| net.contains(&ip)) {
            tracing::warn!(security = true, client_ip = %ip, "Request from outside the allow-list");
            return Err(ApiError::Forbidden("source address not allowed".to_string()));
        }

        if let Some(inner) = &state.rate_limit.inner
            && inner.ip_limiter.check_key(&ip.to_string()).is_err()
        {
            return Err(ApiError::RateLimited("too many requests".to_string()));
        }
    }

    Ok(next.run(req).await)
}

/// Sync trigger budget: one pass per configured interval.
pub async fn sync_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(inner) = &state.rate_limit.inner
        && let Some(limiter) = &inner.sync_limiter
        && limiter.check().is_err()
    {
        return Err(ApiError::RateLimited(
            "a sync pass was triggered too recently".to_string(),
        ));
    }
    Ok(next.run(req).await)
}

/// Shared budget for cleanup and rotation triggers.
pub async fn ops_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(inner) = &state.rate_limit.inner
        && inner.ops_limiter.check().is_err()
    {
        return Err(ApiError::RateLimited(
            "operation budget exhausted".to_string(),
        ));
    }
    Ok(next.run(req).await)
}
