//! Event model for execution event sourcing.
//!
//! All workflow state is derived from events stored in the event table.
//! Events are immutable once committed and totally ordered per execution
//! by `event_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The closed set of event types the engine emits and recognizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Execution began
    ExecutionStart,
    /// Execution finished successfully
    ExecutionCompleted,
    /// Execution failed
    ExecutionFailed,
    /// Execution was cancelled
    ExecutionCancelled,
    /// A step's work is being dispatched
    StepStarted,
    /// Action execution began on a worker
    ActionStarted,
    /// Action finished successfully
    ActionCompleted,
    /// Action failed
    ActionFailed,
    /// One iteration of an iterator completed
    LoopIteration,
    /// All iterations of a loop are accounted for
    LoopAggregated,
    /// Control moved from one step to another
    Transition,
    /// A step's when predicate evaluated false
    Skipped,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStart => "execution_start",
            EventType::ExecutionCompleted => "execution_completed",
            EventType::ExecutionFailed => "execution_failed",
            EventType::ExecutionCancelled => "execution_cancelled",
            EventType::StepStarted => "step_started",
            EventType::ActionStarted => "action_started",
            EventType::ActionCompleted => "action_completed",
            EventType::ActionFailed => "action_failed",
            EventType::LoopIteration => "loop_iteration",
            EventType::LoopAggregated => "loop_aggregated",
            EventType::Transition => "transition",
            EventType::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution_start" => Ok(EventType::ExecutionStart),
            "execution_completed" => Ok(EventType::ExecutionCompleted),
            "execution_failed" => Ok(EventType::ExecutionFailed),
            "execution_cancelled" => Ok(EventType::ExecutionCancelled),
            "step_started" => Ok(EventType::StepStarted),
            "action_started" => Ok(EventType::ActionStarted),
            "action_completed" => Ok(EventType::ActionCompleted),
            "action_failed" => Ok(EventType::ActionFailed),
            "loop_iteration" => Ok(EventType::LoopIteration),
            "loop_aggregated" => Ok(EventType::LoopAggregated),
            "transition" => Ok(EventType::Transition),
            "skipped" => Ok(EventType::Skipped),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

/// Event status values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Started => "started",
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status is terminal for a node.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::Cancelled
        )
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EventStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "started" => EventStatus::Started,
            "in_progress" | "running" => EventStatus::InProgress,
            "completed" => EventStatus::Completed,
            "failed" => EventStatus::Failed,
            "skipped" => EventStatus::Skipped,
            "cancelled" | "canceled" => EventStatus::Cancelled,
            _ => EventStatus::InProgress,
        }
    }
}

/// Database event record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    /// Owning execution.
    pub execution_id: i64,

    /// Event identifier, strictly monotonic within an execution.
    pub event_id: i64,

    /// Event type tag.
    pub event_type: String,

    /// The step or action this event pertains to. Loop iterations use
    /// synthesized names like `<step>#<index>`.
    pub node_id: String,

    /// Back-reference establishing causality within the execution.
    pub parent_event_id: Option<i64>,

    /// Event status.
    pub status: String,

    /// Action-specific data (inputs, outputs, error details).
    pub payload: Option<serde_json::Value>,

    /// The resolved variable environment as observed at emission time.
    pub context: Option<serde_json::Value>,

    /// Distributed tracing identifier.
    pub trace_id: Option<String>,

    /// Parent span for distributed tracing.
    pub parent_span_id: Option<String>,

    /// When the event was committed (UTC).
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Parse the event type tag.
    pub fn event_type(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    /// The `payload.result` value, if any.
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref().and_then(|p| p.get("result"))
    }
}

/// Request to append a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAppendRequest {
    /// Owning execution.
    pub execution_id: i64,

    /// Event type tag.
    pub event_type: String,

    /// The step or action this event pertains to.
    pub node_id: String,

    /// Back-reference establishing causality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<i64>,

    /// Event status.
    pub status: String,

    /// Action-specific data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Variable environment at emission time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    /// Makes a repeated append with the same key return the existing event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Distributed tracing identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Parent span for distributed tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl EventAppendRequest {
    /// Build a request with the common fields set.
    pub fn new(
        execution_id: i64,
        event_type: EventType,
        node_id: impl Into<String>,
        status: EventStatus,
    ) -> Self {
        Self {
            execution_id,
            event_type: event_type.to_string(),
            node_id: node_id.into(),
            parent_event_id: None,
            status: status.to_string(),
            payload: None,
            context: None,
            idempotency_key: None,
            trace_id: None,
            parent_span_id: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_parent(mut self, parent_event_id: i64) -> Self {
        self.parent_event_id = Some(parent_event_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Event response for the API. All IDs are serialized as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    pub event_id: String,
    pub execution_id: String,
    pub event_type: String,
    pub node_id: String,
    pub parent_event_id: Option<String>,
    pub status: String,
    pub payload: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(e: Event) -> Self {
        Self {
            event_id: e.event_id.to_string(),
            execution_id: e.execution_id.to_string(),
            event_type: e.event_type,
            node_id: e.node_id,
            parent_event_id: e.parent_event_id.map(|id| id.to_string()),
            status: e.status,
            payload: e.payload,
            context: e.context,
            timestamp: e.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for tag in [
            "execution_start",
            "execution_completed",
            "execution_failed",
            "execution_cancelled",
            "step_started",
            "action_started",
            "action_completed",
            "action_failed",
            "loop_iteration",
            "loop_aggregated",
            "transition",
            "skipped",
        ] {
            let parsed: EventType = tag.parse().unwrap();
            assert_eq!(parsed.to_string(), tag);
        }
    }

    #[test]
    fn test_event_type_unknown() {
        assert!("not_a_tag".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_status_terminal() {
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());
        assert!(EventStatus::Cancelled.is_terminal());
        assert!(!EventStatus::Started.is_terminal());
        assert!(!EventStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_event_result_accessor() {
        let event = Event {
            execution_id: 1,
            event_id: 1,
            event_type: "action_completed".to_string(),
            node_id: "fetch".to_string(),
            parent_event_id: None,
            status: "completed".to_string(),
            payload: Some(serde_json::json!({"result": {"x": 7}, "duration_ms": 12})),
            context: None,
            trace_id: None,
            parent_span_id: None,
            created_at: Utc::now(),
        };

        assert_eq!(event.result(), Some(&serde_json::json!({"x": 7})));
        assert_eq!(event.event_type(), Some(EventType::ActionCompleted));
    }

    #[test]
    fn test_append_request_builder() {
        let req = EventAppendRequest::new(7, EventType::StepStarted, "start", EventStatus::Started)
            .with_parent(3)
            .with_idempotency_key("step:start");

        assert_eq!(req.event_type, "step_started");
        assert_eq!(req.status, "started");
        assert_eq!(req.parent_event_id, Some(3));
        assert_eq!(req.idempotency_key.as_deref(), Some("step:start"));
    }

    #[test]
    fn test_event_response_string_ids() {
        let event = Event {
            execution_id: 42,
            event_id: 3,
            event_type: "transition".to_string(),
            node_id: "a".to_string(),
            parent_event_id: Some(2),
            status: "completed".to_string(),
            payload: None,
            context: None,
            trace_id: None,
            parent_span_id: None,
            created_at: Utc::now(),
        };

        let response = EventResponse::from(event);
        assert_eq!(response.execution_id, "42");
        assert_eq!(response.event_id, "3");
        assert_eq!(response.parent_event_id.as_deref(), Some("2"));
    }
}
