mod api;
mod bridge;
mod clock;
mod config;
mod dns;
mod error;
mod gc;
mod manager;
mod probe;
mod relay;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::API_PREFIX;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::dns::{DnsCache, SystemResolver};
use crate::manager::RelayHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vnc_relayd=info"))
        )
        .init();

    tracing::info!("Starting vnc-relayd");

    // Load config, falling back to built-in defaults
    let config = match std::env::args().nth(1) {
        Some(config_path) => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::default()
        }
    };

    let clock = Arc::new(SystemClock);
    let dns = Arc::new(DnsCache::new(&config.dns, Arc::new(SystemResolver), clock.clone()));
    tracing::info!(
        max_concurrent_lookups = config.dns.max_concurrent_lookups,
        "DNS cache ready"
    );

    // Start relay manager task
    let relays = RelayHandle::spawn(&config, dns, clock);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let app = api::routes::router(api::routes::AppState {
        relays: relays.clone(),
    });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on http://{}{}", config.api.listen, API_PREFIX);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();
    let _ = server_handle.await;

    // Stop every relay so no listener outlives the process
    if let Err(e) = relays.shutdown().await {
        tracing::error!("Failed to shut down relay manager: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
