//! Strata server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use strata_core::config::AppConfig;
use strata_server::{AppState, create_router};
use strata_storage::{NoopReleaser, SyncCoordinator, TierSet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Strata - tiered storage lifecycle service
#[derive(Parser, Debug)]
#[command(name = "stratad")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STRATA_CONFIG",
        default_value = "config/strata.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Strata v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STRATA_") && key != "STRATA_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: stratad --config /path/to/strata.toml\n  \
             2. Environment variables: STRATA_SERVER__BIND=0.0.0.0:8080 \
             STRATA_ORCHESTRATOR__TOKEN_HASH=YOUR_SHA256_HEX stratad\n\n\
             Set STRATA_CONFIG to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STRATA_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    // Initialize storage tiers and verify they are writable before
    // accepting requests
    let tiers = Arc::new(
        TierSet::from_config(&config.tiers)
            .await
            .context("failed to initialize storage tiers")?,
    );
    tiers
        .ephemeral
        .verify_writable()
        .await
        .context("ephemeral tier is not writable")?;
    if let Some(persistent) = &tiers.persistent {
        persistent
            .verify_writable()
            .await
            .context("persistent tier is not writable")?;
        tracing::info!(root = %persistent.root().display(), "Persistent tier initialized");
    } else {
        tracing::warn!("No persistent tier configured; promotion is disabled");
    }
    tracing::info!(root = %tiers.ephemeral.root().display(), "Ephemeral tier initialized");

    // Initialize the catalog connection and verify connectivity early so
    // misconfiguration fails the boot instead of the first pass
    let catalog = strata_catalog::from_config(&config.catalog)
        .await
        .context("failed to initialize catalog store")?;
    catalog
        .health_check()
        .await
        .context("catalog health check failed")?;
    tracing::info!("Catalog connectivity verified");

    let state = AppState::new(
        config.clone(),
        tiers.clone(),
        catalog.clone(),
        Arc::new(NoopReleaser),
    )
    .context("failed to initialize application state")?;

    // Spawn the scheduled sync loop if enabled
    if config.sync.schedule_enabled {
        let interval = config.sync.interval();
        let sync_config = config.sync.clone();
        let tiers = tiers.clone();
        let catalog = catalog.clone();

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Scheduled sync loop enabled"
            );
            loop {
                tokio::time::sleep(interval).await;

                let coordinator = SyncCoordinator::new(&tiers, catalog.clone(), sync_config.clone());
                match coordinator.run().await {
                    Ok(report) => tracing::info!(
                        synced = report.files_synced,
                        rejected = report.files_rejected,
                        deleted = report.files_deleted,
                        degraded = report.degraded,
                        "Scheduled sync pass finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Scheduled sync pass failed"),
                }
            }
        });
    }

    let app = create_router(state);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;

    tracing::info!(addr = %addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
