//! Health check handlers.

use axum::{extract::State, Json};
use serde_json::json;

use crate::db;
use crate::state::AppState;

/// Liveness probe.
///
/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Readiness probe including database connectivity.
///
/// GET /api/health
pub async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = db::health_check(&state.db).await;

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "server": state.config.server_name,
        "uptime_seconds": state.uptime_seconds(),
    }))
}
