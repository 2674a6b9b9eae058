//! Velero Backup Manager
//!
//! Main entry point. Connects to the Kubernetes API server, then serves the
//! backup API and the metrics endpoints until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use velero_backup_manager::{
    adapters::{ClusterObjectGateway, KubeGateway},
    api,
    config::Config,
    metrics,
    services::Services,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::parse();
    config.validate()?;
    info!(namespace = %config.namespace, "Starting Velero Backup Manager");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let gateway: Arc<dyn ClusterObjectGateway> = Arc::new(KubeGateway::new(client));
    let services = Arc::new(Services::new(gateway, &config));
    let shutdown = CancellationToken::new();

    let mut metrics_handle = tokio::spawn(metrics::serve(config.metrics_port, shutdown.clone()));
    let mut api_handle = tokio::spawn(api::serve(config.api_port, services, shutdown.clone()));

    tokio::select! {
        result = &mut api_handle => {
            error!(?result, "Backup API exited unexpectedly");
        }
        result = &mut metrics_handle => {
            error!(?result, "Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping manager");
        }
    }

    // Let in-flight API requests finish
    shutdown.cancel();
    if !api_handle.is_finished() {
        if let Err(e) = api_handle.await? {
            error!(error = %e, "Backup API failed during shutdown");
        }
    }

    info!("Velero Backup Manager stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
