//! LockNet service daemon: bus gateway plus periodic expiry sweeper.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use locknet_service::bus::BusGateway;
use locknet_service::config::Config;
use locknet_service::lifecycle::LifecycleManager;
use locknet_service::store::Store;
use locknet_service::validation::ValidationEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    info!("Starting LockNet service");

    let config = Config::from_env()?;
    let store = Store::open(&config.database_path)?;

    let engine = Arc::new(ValidationEngine::new(store.clone()));
    let (publisher, gateway) = BusGateway::connect(&config, engine);
    let lifecycle = Arc::new(LifecycleManager::new(store, Some(publisher)));

    let (shutdown_tx, _) = broadcast::channel(1);

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(gateway.run(shutdown_tx.subscribe()));
    tasks.spawn(
        lifecycle
            .clone()
            .run_sweeper(config.sweep_interval, shutdown_tx.subscribe()),
    );

    info!(
        db = %config.database_path,
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        prefix = %config.topic_prefix,
        "LockNet service running"
    );

    wait_for_signal().await;

    info!("Initiating graceful shutdown");
    let _ = shutdown_tx.send(());
    while tasks.join_next().await.is_some() {}
    info!("Shutdown complete");

    Ok(())
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_signal() {
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
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
