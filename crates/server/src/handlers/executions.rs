//! Execution API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{EventResponse, ExecutionResponse};
use crate::error::AppResult;
use crate::services::execution::{ReportEventRequest, RunRequest};
use crate::services::ExecutionService;

/// Query parameters for listing executions.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Query parameters for paging the event log.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Return events with `event_id` greater than this.
    #[serde(default)]
    pub since_event_id: i64,
}

/// Cancel request body.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "cancelled by request".to_string()
}

/// Worker event report body.
#[derive(Debug, Deserialize)]
pub struct ReportEventBody {
    #[serde(flatten)]
    pub event: ReportEventRequest,
    /// When set, the report is validated against the job's lease.
    pub queue_id: Option<String>,
}

/// Event list response.
#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<EventResponse>,
    pub total: usize,
}

/// Start an execution.
///
/// POST /api/executions/run
pub async fn run(
    State(service): State<ExecutionService>,
    Json(request): Json<RunRequest>,
) -> AppResult<Json<ExecutionResponse>> {
    let execution = service.run(request).await?;
    Ok(Json(execution.into()))
}

/// Fetch execution status and summary.
///
/// GET /api/executions/{execution_id}
pub async fn get(
    State(service): State<ExecutionService>,
    Path(execution_id): Path<String>,
) -> AppResult<Json<ExecutionResponse>> {
    let execution = service.get(&execution_id).await?;
    Ok(Json(execution.into()))
}

/// List executions.
///
/// GET /api/executions
pub async fn list(
    State(service): State<ExecutionService>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ExecutionResponse>>> {
    let executions = service.list(query.limit).await?;
    Ok(Json(executions.into_iter().map(Into::into).collect()))
}

/// Page the event log of an execution.
///
/// GET /api/executions/{execution_id}/events
pub async fn events(
    State(service): State<ExecutionService>,
    Path(execution_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<EventListResponse>> {
    let events = service.events(&execution_id, query.since_event_id).await?;
    let events: Vec<EventResponse> = events.into_iter().map(Into::into).collect();
    let total = events.len();
    Ok(Json(EventListResponse { events, total }))
}

/// Cancel an execution.
///
/// POST /api/executions/{execution_id}/cancel
pub async fn cancel(
    State(service): State<ExecutionService>,
    Path(execution_id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> AppResult<Json<serde_json::Value>> {
    service.cancel(&execution_id, &request.reason).await?;
    Ok(Json(serde_json::json!({"status": "cancelled"})))
}

/// Append a worker-reported event.
///
/// POST /api/events
pub async fn report_event(
    State(service): State<ExecutionService>,
    Json(body): Json<ReportEventBody>,
) -> AppResult<Json<EventResponse>> {
    let event = service.report_event(&body.event, body.queue_id).await?;
    Ok(Json(event.into()))
}
