//! Worker-facing queue handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{FailOutcome, LeaseRequest, QueueJobResponse};
use crate::error::{AppError, AppResult};
use crate::services::queue::{CompleteRequest, FailRequest};
use crate::services::QueueService;

/// Heartbeat request body.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub lease_duration_seconds: Option<u64>,
}

/// Heartbeat response.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub lease_expires_at: DateTime<Utc>,
}

/// Lease a job.
///
/// POST /api/queue/lease
///
/// Returns the leased job, or null when nothing is leasable.
pub async fn lease(
    State(service): State<QueueService>,
    Json(request): Json<LeaseRequest>,
) -> AppResult<Json<Option<QueueJobResponse>>> {
    let job = service.lease(&request).await?;
    Ok(Json(job.map(Into::into)))
}

/// Extend a job lease.
///
/// POST /api/queue/{queue_id}/heartbeat
pub async fn heartbeat(
    State(service): State<QueueService>,
    Path(queue_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    let queue_id = parse_queue_id(&queue_id)?;
    let lease_expires_at = service
        .heartbeat(queue_id, &request.worker_id, request.lease_duration_seconds)
        .await?;
    Ok(Json(HeartbeatResponse { lease_expires_at }))
}

/// Report success with the result payload.
///
/// POST /api/queue/{queue_id}/complete
pub async fn complete(
    State(service): State<QueueService>,
    Path(queue_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let queue_id = parse_queue_id(&queue_id)?;
    service.complete(queue_id, &request).await?;
    Ok(Json(serde_json::json!({"status": "completed"})))
}

/// Report failure.
///
/// POST /api/queue/{queue_id}/fail
pub async fn fail(
    State(service): State<QueueService>,
    Path(queue_id): Path<String>,
    Json(request): Json<FailRequest>,
) -> AppResult<Json<FailOutcome>> {
    let queue_id = parse_queue_id(&queue_id)?;
    let outcome = service.fail(queue_id, &request).await?;
    Ok(Json(outcome))
}

/// Trigger an immediate reap of expired leases.
///
/// POST /api/queue/reap-expired
pub async fn reap_expired(
    State(service): State<QueueService>,
) -> AppResult<Json<serde_json::Value>> {
    let reclaimed = service.reap_expired().await?;
    Ok(Json(serde_json::json!({"reclaimed": reclaimed})))
}

fn parse_queue_id(value: &str) -> AppResult<i64> {
    value
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid queue_id: {}", value)))
}
