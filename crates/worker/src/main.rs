//! NoETL Worker
//!
//! Leases jobs from the server queue and executes their actions.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use noetl_worker::{Worker, WorkerConfig};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,noetl_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load worker config, using defaults");
        WorkerConfig::default()
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server_url = %config.server_url,
        pool = %config.worker_pool_name,
        "Starting NoETL worker"
    );

    let worker = Worker::new(config);
    let shutdown = worker.shutdown_token();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received; draining");
        shutdown.cancel();
    });

    worker.run().await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
