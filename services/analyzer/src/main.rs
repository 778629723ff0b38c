mod config;
mod processor;

use anyhow::{Context, Result};
use config::Config;
use iris_core::{HttpVisionClient, S3ArtifactStore, SqsWorkQueue};
use processor::{Worker, WorkerSettings};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Iris analyzer"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize collaborators
    let images = Arc::new(
        S3ArtifactStore::new(&config.storage.s3, config.storage.images_prefix.clone()).await,
    );
    let metadata = Arc::new(
        S3ArtifactStore::new(&config.storage.s3, config.storage.metadata_prefix.clone()).await,
    );
    let queue = Arc::new(SqsWorkQueue::new(&config.queue).await);
    let analyzer = Arc::new(
        HttpVisionClient::new(&config.vision).context("Failed to initialize vision client")?,
    );

    let worker = Worker::new(
        images,
        metadata,
        queue,
        analyzer,
        WorkerSettings::from(&config.worker),
    );

    // Run the worker until shutdown; cancellation lets an in-flight
    // message finish before the loop exits
    let cancel = CancellationToken::new();
    let worker_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    info!("Analyzer started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down analyzer");

    cancel.cancel();
    worker_handle
        .await
        .context("Worker task panicked during shutdown")?;

    info!("Analyzer stopped");

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

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
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
