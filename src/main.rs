//! OCM Backup Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! starts the Backup and Velero backup controllers, and serves metrics.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ocm_backup_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    metrics,
    repository::KubeRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = OperatorConfig::from_env()?;
    info!(
        edition = %config.edition,
        platform_namespaces = ?config.platform_namespaces.as_slice(),
        "Starting OCM Backup Operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let shutdown = CancellationToken::new();
    let metrics_port = config.metrics_port;
    let repository = Arc::new(KubeRepository::new(client.clone()));
    let context = Arc::new(Context::new(repository, config).with_shutdown(shutdown.clone()));

    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let backup_controller = controllers::run_backup_controller(client.clone(), context.clone());
    let velero_backup_controller =
        controllers::run_velero_backup_controller(client.clone(), context.clone());

    tokio::select! {
        _ = backup_controller => {
            error!("Backup controller exited unexpectedly");
        }
        _ = velero_backup_controller => {
            error!("Velero backup controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    metrics::OPERATOR_HEALTH.set(0.0);
    info!("OCM Backup Operator stopped");
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
            error!("Failed to install CTRL+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
