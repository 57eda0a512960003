//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable request tracing.
    #[serde(default)]
    pub enable_tracing: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_tracing: false,
        }
    }
}

/// Storage tier configuration.
///
/// The ephemeral root is always required. A missing persistent root is a
/// valid single-tier deployment: promotion and persistent-tier
/// reconciliation degrade to no-ops.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierConfig {
    /// Root directory of the ephemeral (compute-local) tier.
    pub ephemeral_root: PathBuf,
    /// Root directory of the durable persistent tier, if mounted.
    #[serde(default)]
    pub persistent_root: Option<PathBuf>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            ephemeral_root: PathBuf::from("./data/ephemeral"),
            persistent_root: None,
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// File catalog configuration.
///
/// The catalog is read-only ground truth for this service; Strata never
/// writes to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CatalogConfig {
    /// SQLite database (testing and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer the STRATA_CATALOG__PASSWORD env var over config files.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300_000) // 5 minutes
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/catalog.db"),
        }
    }
}

impl CatalogConfig {
    /// Validate catalog configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            CatalogConfig::Sqlite { .. } => Ok(()),
            CatalogConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => {
                    Err("postgres config requires 'database' when using individual fields"
                        .to_string())
                }
            },
        }
    }
}

/// Rotation drain configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Maximum acceptable percentage of catalog entries missing from both
    /// tiers before verification fails (default: 10.0).
    ///
    /// A strict 0% bar false-fails under ordinary concurrent traffic
    /// (brand-new or just-deleted files). Kept configurable pending a
    /// product decision on the exact risk trade-off.
    #[serde(default = "default_missing_tolerance_pct")]
    pub missing_tolerance_pct: f64,
    /// Deadline for a single drain run, in seconds (default: 600).
    /// On expiry the run returns a degraded report instead of blocking the
    /// orchestrator.
    #[serde(default = "default_rotation_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_missing_tolerance_pct() -> f64 {
    10.0
}

fn default_rotation_deadline_secs() -> u64 {
    600
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            missing_tolerance_pct: default_missing_tolerance_pct(),
            deadline_secs: default_rotation_deadline_secs(),
        }
    }
}

impl RotationConfig {
    /// Get the drain deadline as a Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Validate rotation configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.missing_tolerance_pct) {
            return Err(format!(
                "rotation.missing_tolerance_pct {} must be between 0 and 100",
                self.missing_tolerance_pct
            ));
        }
        if self.deadline_secs == 0 {
            return Err("rotation.deadline_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Tier synchronization configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Enable the periodic sync loop (disabled by default; sync is also
    /// always available on demand via the internal API).
    #[serde(default)]
    pub schedule_enabled: bool,
    /// Interval in seconds between scheduled sync passes (default: 1 hour).
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    /// Deadline for a single sync pass, in seconds (default: 600).
    #[serde(default = "default_sync_deadline_secs")]
    pub deadline_secs: u64,
    /// Grace period in seconds before an orphaned blob becomes
    /// cleanup-eligible (default: 1 hour). Protects files whose catalog row
    /// is still being committed by a concurrent upload.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_sync_interval_secs() -> u64 {
    3600
}

fn default_sync_deadline_secs() -> u64 {
    600
}

fn default_orphan_grace_secs() -> u64 {
    3600
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule_enabled: false,
            interval_secs: default_sync_interval_secs(),
            deadline_secs: default_sync_deadline_secs(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl SyncConfig {
    /// Get the schedule interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the pass deadline as a Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Get the orphan grace period as a Duration.
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }

    /// Validate sync configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule_enabled && self.interval_secs == 0 {
            return Err("sync.interval_secs cannot be 0 when scheduling is enabled".to_string());
        }
        if self.deadline_secs == 0 {
            return Err("sync.deadline_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Orchestrator authentication configuration.
///
/// The internal API is consumed only by a trusted orchestrator process.
/// The config stores a pre-computed SHA-256 hash of the bearer token;
/// presented tokens are hashed and the digests compared, which is
/// constant-time with respect to the secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// SHA-256 hex hash of the orchestrator bearer token (64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Optional IP allow-list (single IPs or CIDR ranges). Empty means any
    /// source IP is accepted (token auth still applies).
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

impl OrchestratorConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is the SHA-256 of "test-orchestrator-token".
    pub fn for_testing() -> Self {
        Self {
            token_hash: "e32056f45afa70a7c2b4c43359538eab39e4a6091eea915e69c6a9ba290fc687"
                .to_string(),
            allowed_ips: Vec::new(),
        }
    }

    /// Validate orchestrator configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64
            || !self.token_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(
                "orchestrator.token_hash must be a 64-character SHA-256 hex digest".to_string(),
            );
        }
        Ok(())
    }
}

/// Rate limiting configuration for the internal API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Requests per minute per source IP (default: 60).
    #[serde(default = "default_ip_requests_per_minute")]
    pub ip_requests_per_minute: u32,
    /// Minimum seconds between sync invocations (default: 30).
    #[serde(default = "default_sync_min_interval_secs")]
    pub sync_min_interval_secs: u64,
    /// Requests per minute for cleanup and rotation operations (default: 60).
    #[serde(default = "default_ops_per_minute")]
    pub ops_per_minute: u32,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_ip_requests_per_minute() -> u32 {
    60
}

fn default_sync_min_interval_secs() -> u64 {
    30
}

fn default_ops_per_minute() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            ip_requests_per_minute: default_ip_requests_per_minute(),
            sync_min_interval_secs: default_sync_min_interval_secs(),
            ops_per_minute: default_ops_per_minute(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.ip_requests_per_minute == 0 || self.ops_per_minute == 0 {
            return Err("rate_limit request rates cannot be 0 when enabled".to_string());
        }
        if self.sync_min_interval_secs == 0 {
            return Err("rate_limit.sync_min_interval_secs cannot be 0 when enabled".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage tier roots.
    #[serde(default)]
    pub tiers: TierConfig,
    /// File catalog connection.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Rotation drain behavior.
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Tier synchronization behavior.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Orchestrator authentication (required).
    pub orchestrator: OrchestratorConfig,
    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem tiers under ./data, SQLite
    /// catalog, and a dummy orchestrator token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            tiers: TierConfig::default(),
            catalog: CatalogConfig::default(),
            rotation: RotationConfig::default(),
            sync: SyncConfig::default(),
            orchestrator: OrchestratorConfig::for_testing(),
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
        }
    }

    /// Validate the full configuration, collecting the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.catalog.validate()?;
        self.rotation.validate()?;
        self.sync.validate()?;
        self.orchestrator.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_defaults() {
        let config = RotationConfig::default();
        assert_eq!(config.missing_tolerance_pct, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rotation_rejects_bad_tolerance() {
        let config = RotationConfig {
            missing_tolerance_pct: 101.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_catalog_postgres_requires_url_or_host() {
        let config = CatalogConfig::Postgres {
            url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
            statement_timeout_ms: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_orchestrator_rejects_short_hash() {
        let config = OrchestratorConfig {
            token_hash: "abc".to_string(),
            allowed_ips: Vec::new(),
        };
        assert!(config.validate().is_err());
        assert!(OrchestratorConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_sync_deserialize_defaults() {
        let json = r#"{"schedule_enabled": true}"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.interval_secs, 3600);
        assert_eq!(config.orphan_grace_secs, 3600);
        assert!(config.validate().is_ok());
    }
}
