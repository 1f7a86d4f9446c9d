//! Worker runtime handlers.

use axum::{extract::State, Json};

use crate::db::models::{Runtime, RuntimeRegisterRequest};
use crate::error::AppResult;
use crate::services::RuntimeService;

/// Register a worker on startup.
///
/// POST /api/runtime/register
pub async fn register(
    State(service): State<RuntimeService>,
    Json(request): Json<RuntimeRegisterRequest>,
) -> AppResult<Json<Runtime>> {
    let runtime = service.register(&request).await?;
    Ok(Json(runtime))
}

/// Worker liveness heartbeat; auto-recreates a missing registration.
///
/// POST /api/runtime/heartbeat
pub async fn heartbeat(
    State(service): State<RuntimeService>,
    Json(request): Json<RuntimeRegisterRequest>,
) -> AppResult<Json<serde_json::Value>> {
    service.heartbeat(&request).await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

/// List worker registrations.
///
/// GET /api/runtimes
pub async fn list(State(service): State<RuntimeService>) -> AppResult<Json<Vec<Runtime>>> {
    let runtimes = service.list().await?;
    Ok(Json(runtimes))
}
