//! Tollgate API Server
//!
//! Loads dataset documents from `TOLLGATE_CONFIG_DIR`, connects to ClickHouse
//! and serves the query and admin API on `TOLLGATE_PORT` (default 8080).

use std::sync::Arc;
use tollgate_api::{app, AppState};
use tollgate_engine::{ClickhouseHttpBackend, DatasetRouter, EngineConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    });
    tracing::info!(clickhouse = ?config.clickhouse, "Using ClickHouse backend");

    let backend = ClickhouseHttpBackend::new(config.clickhouse.clone()).unwrap_or_else(|e| {
        tracing::error!("Failed to create backend: {}", e);
        std::process::exit(1);
    });

    let mut router = DatasetRouter::new(Arc::new(backend), config.policy_store.clone());
    if let Err(e) = router.load_dir(&config.config_dir) {
        tracing::error!(
            "Failed to load datasets from {}: {}",
            config.config_dir.display(),
            e
        );
        std::process::exit(1);
    }

    let app = app(AppState::new(router));

    let port = match std::env::var("TOLLGATE_PORT") {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::error!("TOLLGATE_PORT must be a valid port number, got '{}'", value);
            std::process::exit(1);
        }),
        Err(_) => DEFAULT_PORT,
    };
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Tollgate API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        });
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
