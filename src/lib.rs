//! supportbundles -- lifecycle management for diagnostic support bundles.
//!
//! Bundles are assembled on demand from registered collectors, stored with an
//! expiry in SQLite, and reaped by a periodic cleanup loop.

pub mod api;
pub mod bundle;
pub mod config;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LogFormat, LoggingConfig};
use crate::registry::CollectorRegistry;
use crate::service::SupportBundleService;
use crate::storage::BundleStore;

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Resolve the configuration, logging through a temporary subscriber since
/// the configured one cannot exist before the configuration does.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::resolve(explicit))
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = env_filter(&logging.level);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}

/// Open storage, register the built-in collectors, and build the service.
pub fn build_service(config: &Config) -> Result<SupportBundleService> {
    let db_path = &config.storage.db_path;
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(db_path)
        .with_context(|| format!("failed to open database {}", db_path))?;

    let mut registry = CollectorRegistry::new();
    registry::collectors::register_builtin(&mut registry, config, pool.clone())?;

    let store = BundleStore::new(pool, config.support_bundles.retention());
    Ok(SupportBundleService::new(
        store,
        Arc::new(registry),
        config.support_bundles.clone(),
    ))
}

/// Start the daemon: cleanup loop and API server, until Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
    let service = build_service(&config)?;
    let shutdown = CancellationToken::new();

    // Cleanup loop (background task)
    let cleanup = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { service.run(shutdown).await })
    };

    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(api::state::AppState::new(service));

    tracing::info!(%addr, "supportbundles listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    cleanup.await??;
    Ok(())
}
