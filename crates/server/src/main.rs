//! NoETL Server
//!
//! An async Rust server providing the event log, job queue, broker, and
//! REST API for distributed playbook execution.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use noetl_server::{
    config::{AppConfig, DatabaseConfig},
    db::{create_pool, schema},
    engine::Broker,
    handlers,
    services::{CatalogService, CredentialService, ExecutionService, QueueService, RuntimeService},
    state::AppState,
};

/// Default encryption key for development (override in production).
const DEFAULT_ENCRYPTION_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,noetl_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router with all routes.
fn build_router(
    state: AppState,
    catalog_service: CatalogService,
    credential_service: CredentialService,
    execution_service: ExecutionService,
    queue_service: QueueService,
    runtime_service: RuntimeService,
) -> Router {
    // CORS configuration - permissive for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state);

    let execution_routes = Router::new()
        .route("/api/executions/run", post(handlers::executions::run))
        .route("/api/executions", get(handlers::executions::list))
        .route(
            "/api/executions/{execution_id}",
            get(handlers::executions::get),
        )
        .route(
            "/api/executions/{execution_id}/events",
            get(handlers::executions::events),
        )
        .route(
            "/api/executions/{execution_id}/cancel",
            post(handlers::executions::cancel),
        )
        .route("/api/events", post(handlers::executions::report_event))
        .with_state(execution_service);

    let queue_routes = Router::new()
        .route("/api/queue/lease", post(handlers::queue::lease))
        .route(
            "/api/queue/reap-expired",
            post(handlers::queue::reap_expired),
        )
        .route(
            "/api/queue/{queue_id}/heartbeat",
            post(handlers::queue::heartbeat),
        )
        .route(
            "/api/queue/{queue_id}/complete",
            post(handlers::queue::complete),
        )
        .route("/api/queue/{queue_id}/fail", post(handlers::queue::fail))
        .with_state(queue_service);

    let runtime_routes = Router::new()
        .route("/api/runtime/register", post(handlers::runtime::register))
        .route("/api/runtime/heartbeat", post(handlers::runtime::heartbeat))
        .route("/api/runtimes", get(handlers::runtime::list))
        .with_state(runtime_service);

    let catalog_routes = Router::new()
        .route("/api/catalog/register", post(handlers::catalog::register))
        .route("/api/catalog/resource", get(handlers::catalog::get_resource))
        .route("/api/catalog", get(handlers::catalog::list))
        .route("/api/catalog/{catalog_id}", get(handlers::catalog::get_by_id))
        .with_state(catalog_service);

    let credential_routes = Router::new()
        .route(
            "/api/credentials",
            post(handlers::credentials::create_or_update),
        )
        .route("/api/credentials", get(handlers::credentials::list))
        .route("/api/credentials/{name}", get(handlers::credentials::get))
        .route(
            "/api/credentials/{name}/data",
            get(handlers::credentials::materialize),
        )
        .route(
            "/api/credentials/{name}",
            delete(handlers::credentials::delete),
        )
        .with_state(credential_service);

    Router::new()
        .merge(health_routes)
        .merge(execution_routes)
        .merge(queue_routes)
        .merge(runtime_routes)
        .merge(catalog_routes)
        .merge(credential_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Periodically reclaim expired leases.
fn spawn_reaper(queue_service: QueueService, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        ticker.tick().await; // Skip first immediate tick

        loop {
            ticker.tick().await;
            if let Err(e) = queue_service.reap_expired().await {
                tracing::error!(error = %e, "Lease reap failed");
            }
        }
    });
}

/// Periodically mark stale worker registrations offline.
fn spawn_runtime_sweep(runtime_service: RuntimeService, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = runtime_service.sweep_offline().await {
                tracing::error!(error = %e, "Runtime sweep failed");
            }
        }
    });
}

/// Get the credential encryption key from the environment.
fn get_encryption_key() -> String {
    std::env::var("NOETL_ENCRYPTION_KEY").unwrap_or_else(|_| {
        tracing::warn!("NOETL_ENCRYPTION_KEY not set, using default (not secure for production)");
        DEFAULT_ENCRYPTION_KEY.to_string()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting NoETL server");

    let app_config = Arc::new(AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    }));

    let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load database config, using defaults");
        DatabaseConfig::default()
    });

    let db_pool = create_pool(&db_config).await?;
    schema::init_schema(&db_pool).await?;

    let encryption_key = get_encryption_key();

    // Wire up the broker and services
    let broker = Broker::new(db_pool.clone(), app_config.clone());
    let catalog_service = CatalogService::new(db_pool.clone());
    let credential_service = CredentialService::new(db_pool.clone(), &encryption_key)?;
    let execution_service = ExecutionService::new(db_pool.clone(), broker.clone());
    let queue_service = QueueService::new(db_pool.clone(), app_config.clone(), broker.clone());
    let runtime_service = RuntimeService::new(db_pool.clone(), app_config.clone());

    // Background maintenance
    spawn_reaper(queue_service.clone(), app_config.reap_interval_seconds);
    spawn_runtime_sweep(runtime_service.clone(), app_config.runtime_sweep_interval);

    let state = AppState::new(db_pool, app_config.clone());
    let app = build_router(
        state,
        catalog_service,
        credential_service,
        execution_service,
        queue_service,
        runtime_service,
    );

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
