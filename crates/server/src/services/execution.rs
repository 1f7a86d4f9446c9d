//! Execution service: the API-facing operations over executions and their
//! event logs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::{Event, EventAppendRequest, Execution};
use crate::db::queries::{event as event_queries, execution as execution_queries, queue as queue_queries};
use crate::db::DbPool;
use crate::engine::broker::{ParentRef, StartRequest};
use crate::engine::Broker;
use crate::error::{AppError, AppResult};

/// Request body for `POST /executions/run`.
///
/// Accepts the documented aliases: `playbook_id` for `path`, and
/// `input_payload` for `parameters`. `sync_to_postgres` is accepted for
/// compatibility and ignored; the workload is always persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", alias = "playbook_id")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, alias = "input_payload")]
    pub parameters: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_step: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,

    /// Compatibility flag; the core always persists the workload.
    #[serde(default, skip_serializing)]
    #[allow(dead_code)]
    pub sync_to_postgres: Option<bool>,
}

impl RunRequest {
    /// Validate and convert to the broker's start request.
    pub fn into_start_request(self) -> AppResult<StartRequest> {
        if self.catalog_id.is_none() && self.path.is_none() {
            return Err(AppError::Validation(
                "Either 'catalog_id' or 'path' must be provided".to_string(),
            ));
        }

        let catalog_id = self
            .catalog_id
            .map(|id| parse_id(&id, "catalog_id"))
            .transpose()?;

        let parent = match (&self.parent_execution_id, &self.parent_step, &self.parent_event_id) {
            (Some(execution_id), Some(step), Some(event_id)) => Some(ParentRef {
                execution_id: parse_id(execution_id, "parent_execution_id")?,
                step: step.clone(),
                event_id: parse_id(event_id, "parent_event_id")?,
            }),
            (None, None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "parent_execution_id, parent_step, and parent_event_id must be set together"
                        .to_string(),
                ))
            }
        };

        Ok(StartRequest {
            catalog_id,
            path: self.path,
            version: self.version,
            parameters: self.parameters,
            parent,
        })
    }
}

/// Worker-reported event, appended through the server so identity and
/// tracing context can be enriched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEventRequest {
    pub execution_id: String,
    pub event_type: String,
    pub node_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// Execution service.
#[derive(Clone)]
pub struct ExecutionService {
    db: DbPool,
    broker: Broker,
}

impl ExecutionService {
    pub fn new(db: DbPool, broker: Broker) -> Self {
        Self { db, broker }
    }

    /// Start an execution.
    pub async fn run(&self, request: RunRequest) -> AppResult<Execution> {
        let start = request.into_start_request()?;
        self.broker.start_execution(&start).await
    }

    /// Fetch execution metadata.
    pub async fn get(&self, execution_id: &str) -> AppResult<Execution> {
        let id = parse_id(execution_id, "execution_id")?;
        execution_queries::get_execution(&self.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution not found: {}", execution_id)))
    }

    /// List executions, newest first.
    pub async fn list(&self, limit: i64) -> AppResult<Vec<Execution>> {
        execution_queries::list_executions(&self.db, limit).await
    }

    /// Page the event log for an execution.
    pub async fn events(&self, execution_id: &str, since_event_id: i64) -> AppResult<Vec<Event>> {
        let id = parse_id(execution_id, "execution_id")?;
        event_queries::get_events(&self.db, id, since_event_id).await
    }

    /// Cancel an execution.
    pub async fn cancel(&self, execution_id: &str, reason: &str) -> AppResult<()> {
        let id = parse_id(execution_id, "execution_id")?;
        self.broker.cancel_execution(id, reason).await
    }

    /// Append a worker-reported event and re-evaluate.
    ///
    /// When the report names a queue job, the event is refused if the
    /// reporting worker no longer holds the job's lease.
    pub async fn report_event(
        &self,
        request: &ReportEventRequest,
        queue_id: Option<String>,
    ) -> AppResult<Event> {
        let execution_id = parse_id(&request.execution_id, "execution_id")?;

        if let (Some(queue_id), Some(worker_id)) = (&queue_id, &request.worker_id) {
            let queue_id = parse_id(queue_id, "queue_id")?;
            let job = queue_queries::get_job(&self.db, queue_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Job not found: {}", queue_id)))?;
            if job.lease_holder.as_deref() != Some(worker_id.as_str()) {
                return Err(AppError::LeaseLost(format!("queue_id={}", queue_id)));
            }
        }

        let mut append = EventAppendRequest {
            execution_id,
            event_type: request.event_type.clone(),
            node_id: request.node_id.clone(),
            parent_event_id: request
                .parent_event_id
                .as_deref()
                .map(|id| parse_id(id, "parent_event_id"))
                .transpose()?,
            status: request.status.clone(),
            payload: request.payload.clone(),
            context: request.context.clone(),
            idempotency_key: request.idempotency_key.clone(),
            trace_id: request.trace_id.clone(),
            parent_span_id: None,
        };

        if append.event_type.parse::<crate::db::models::EventType>().is_err() {
            return Err(AppError::Validation(format!(
                "Unknown event type: {}",
                append.event_type
            )));
        }

        // Establish causality when the reporter did not: an action event
        // points at the step event that scheduled it, and a loop iteration
        // points at its parent iterator event.
        if append.parent_event_id.is_none() {
            let anchor = match request.node_id.split_once('#') {
                Some((step, _)) => step,
                None => request.node_id.as_str(),
            };
            if let Some(previous) =
                event_queries::get_latest_event_by_node(&self.db, execution_id, anchor).await?
            {
                append.parent_event_id = Some(previous.event_id);
            }
        }

        // Enrich with the reporting worker's identity.
        if let Some(worker_id) = &request.worker_id {
            let payload = append.payload.take().unwrap_or(serde_json::json!({}));
            if let serde_json::Value::Object(mut map) = payload {
                map.entry("worker_id".to_string())
                    .or_insert(serde_json::json!(worker_id));
                append.payload = Some(serde_json::Value::Object(map));
            } else {
                append.payload = Some(payload);
            }
        }

        let event = event_queries::append_event(&self.db, &append).await?;
        self.broker.evaluate(execution_id).await?;
        Ok(event)
    }
}

/// Parse a string-typed API identifier.
fn parse_id(value: &str, field: &str) -> AppResult<i64> {
    value
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid {}: {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_aliases() {
        let request: RunRequest = serde_json::from_str(
            r#"{"playbook_id": "workflows/etl", "input_payload": {"url": "https://example.com"}}"#,
        )
        .unwrap();

        assert_eq!(request.path.as_deref(), Some("workflows/etl"));
        assert_eq!(
            request.parameters.get("url"),
            Some(&serde_json::json!("https://example.com"))
        );
    }

    #[test]
    fn test_run_request_requires_reference() {
        let request: RunRequest = serde_json::from_str(r#"{"parameters": {}}"#).unwrap();
        assert!(request.into_start_request().is_err());
    }

    #[test]
    fn test_run_request_parent_triple_all_or_nothing() {
        let request: RunRequest = serde_json::from_str(
            r#"{"path": "p", "parent_execution_id": "1", "parent_step": "s"}"#,
        )
        .unwrap();
        assert!(request.into_start_request().is_err());

        let request: RunRequest = serde_json::from_str(
            r#"{"path": "p", "parent_execution_id": "1", "parent_step": "s", "parent_event_id": "2"}"#,
        )
        .unwrap();
        let start = request.into_start_request().unwrap();
        let parent = start.parent.unwrap();
        assert_eq!(parent.execution_id, 1);
        assert_eq!(parent.step, "s");
        assert_eq!(parent.event_id, 2);
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("12345", "x").is_ok());
        assert!(parse_id("not-a-number", "x").is_err());
    }
}
