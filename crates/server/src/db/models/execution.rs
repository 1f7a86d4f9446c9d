//! Execution model.
//!
//! An execution is one run of one playbook version. Its `status` column is
//! a cached projection of the latest terminal event, never mutated
//! independently of the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Execution lifecycle status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the execution has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ExecutionStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => ExecutionStatus::Pending,
            "running" | "in_progress" => ExecutionStatus::Running,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "cancelled" | "canceled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }
}

/// Database execution record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Execution {
    /// Globally-unique execution identifier.
    pub execution_id: i64,

    /// The playbook version this execution runs.
    pub catalog_id: i64,

    /// Lifecycle status.
    pub status: String,

    /// Initial parameters, merged with playbook defaults.
    pub workload: serde_json::Value,

    /// Parent execution for sub-playbook calls.
    pub parent_execution_id: Option<i64>,

    /// Parent step name for sub-playbook calls.
    pub parent_step: Option<String>,

    /// The parent's step_started event that spawned this execution.
    pub parent_event_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Execution response for the API. All IDs are serialized as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub execution_id: String,
    pub catalog_id: String,
    pub status: String,
    pub workload: serde_json::Value,
    pub parent_execution_id: Option<String>,
    pub parent_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Execution> for ExecutionResponse {
    fn from(e: Execution) -> Self {
        Self {
            execution_id: e.execution_id.to_string(),
            catalog_id: e.catalog_id.to_string(),
            status: e.status,
            workload: e.workload,
            parent_execution_id: e.parent_execution_id.map(|id| id.to_string()),
            parent_step: e.parent_step,
            created_at: e.created_at,
            completed_at: e.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::from(status.as_str()), status);
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_response_string_ids() {
        let execution = Execution {
            execution_id: 99,
            catalog_id: 7,
            status: "running".to_string(),
            workload: serde_json::json!({"url": "https://example.com"}),
            parent_execution_id: Some(42),
            parent_step: Some("subp".to_string()),
            parent_event_id: Some(5),
            created_at: Utc::now(),
            completed_at: None,
        };

        let response = ExecutionResponse::from(execution);
        assert_eq!(response.execution_id, "99");
        assert_eq!(response.catalog_id, "7");
        assert_eq!(response.parent_execution_id.as_deref(), Some("42"));
    }
}
