mod api;
mod config;
mod listing;

use anyhow::{Context, Result};
use api::{start_api_server, AppState};
use config::Config;
use iris_core::{S3ArtifactStore, SqsWorkQueue};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Iris gallery"
    );

    // Initialize collaborators
    let images = Arc::new(
        S3ArtifactStore::new(&config.storage.s3, config.storage.images_prefix.clone()).await,
    );
    let metadata = Arc::new(
        S3ArtifactStore::new(&config.storage.s3, config.storage.metadata_prefix.clone()).await,
    );
    let queue = Arc::new(SqsWorkQueue::new(&config.queue).await);

    let state = AppState {
        images,
        metadata,
        queue,
        url_expiry: config.url_expiry(),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Gallery started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down gallery");

    api_handle.abort();

    info!("Gallery stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
