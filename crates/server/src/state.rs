//! Application state shared across handlers.

use crate::error::{ApiError, ApiResult};
use crate::ratelimit::RateLimitState;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use strata_catalog::CatalogStore;
use strata_core::config::AppConfig;
use strata_storage::{CacheReleaser, TierSet};

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tiers: Arc<TierSet>,
    pub catalog: Arc<dyn CatalogStore>,
    pub releaser: Arc<dyn CacheReleaser>,
    pub rate_limit: RateLimitState,
    /// Parsed orchestrator allow-list; empty means any source address.
    pub allow_list: Arc<Vec<IpNet>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        tiers: Arc<TierSet>,
        catalog: Arc<dyn CatalogStore>,
        releaser: Arc<dyn CacheReleaser>,
    ) -> ApiResult<Self> {
        let rate_limit =
            RateLimitState::from_config(&config.rate_limit).map_err(ApiError::Internal)?;
        let allow_list = parse_allow_list(&config.orchestrator.allowed_ips)?;

        Ok(Self {
            config: Arc::new(config),
            tiers,
            catalog,
            releaser,
            rate_limit,
            allow_list: Arc::new(allow_list),
        })
    }
}

/// Parse allow-list entries, accepting bare IPs as well as CIDR blocks.
///
/// Unlike a proxy trust list, a typo here must not silently widen access,
/// so malformed entries are hard errors.
fn parse_allow_list(entries: &[String]) -> ApiResult<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            if entry.contains('/') {
                entry.parse::<IpNet>().map_err(|_| ())
            } else {
                entry.parse::<IpAddr>().map(IpNet::from).map_err(|_| ())
            }
            .map_err(|()| {
                ApiError::Internal(format!("invalid orchestrator.allowed_ips entry: {entry:?}"))
            })
        })
        .collect()
}
