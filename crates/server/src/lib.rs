//! Internal HTTP surface for Strata.
//!
//! This crate exposes the orchestrator control plane:
//! - sync trigger
//! - orphan cleanup trigger
//! - pre-rotation coordination
//! - readiness probe

pub mod auth;
pub mod error;
pub mod handlers;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use ratelimit::RateLimitState;
pub use routes::create_router;
pub use state::AppState;
