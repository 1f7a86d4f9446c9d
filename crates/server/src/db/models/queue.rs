//! Job queue models.
//!
//! A job is a unit of work pending worker attention. Jobs move through the
//! lifecycle `queued -> leased -> completed | queued (retry) | dead_letter`
//! under lease semantics: only one worker may hold a non-expired lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLetter)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "leased" => JobStatus::Leased,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "dead_letter" => JobStatus::DeadLetter,
            _ => JobStatus::Queued,
        }
    }
}

/// Database queue row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueJob {
    /// Unique job identifier.
    pub queue_id: i64,

    /// Execution this job belongs to.
    pub execution_id: i64,

    /// Step or iteration node this job executes.
    pub node_id: String,

    /// The resolved action specification (type, configuration, rendered
    /// inputs), serialized opaquely.
    pub action: serde_json::Value,

    /// Variable environment at enqueue time.
    pub context: serde_json::Value,

    /// Playbook version this job belongs to.
    pub catalog_id: i64,

    /// Lifecycle status.
    pub status: String,

    /// Worker currently owning this job, null if queued.
    pub lease_holder: Option<String>,

    /// Instant after which an unheartbeated lease is reclaimable.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Count of lease cycles started. Never decreases.
    pub attempts: i32,

    /// Retry policy ceiling.
    pub max_attempts: i32,

    /// Lower is more urgent.
    pub priority: i32,

    /// Earliest instant at which the job may be leased.
    pub available_at: DateTime<Utc>,

    /// Optional worker pool targeting constraint.
    pub worker_pool_label: Option<String>,

    /// Enqueue dedup key, typically `{execution_id}:{node_id}`.
    pub idempotency_key: Option<String>,

    /// Most recent failure message, if any.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueJob {
    /// The action type tag carried in the action specification.
    pub fn action_kind(&self) -> Option<&str> {
        self.action.get("kind").and_then(|v| v.as_str())
    }
}

/// Specification for enqueueing a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobSpec {
    pub execution_id: i64,
    pub node_id: String,
    pub action: serde_json::Value,
    pub context: serde_json::Value,
    pub catalog_id: i64,
    #[serde(default)]
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pool_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl QueueJobSpec {
    /// Build a job spec with the conventional `{execution_id}:{node_id}`
    /// idempotency key.
    pub fn new(
        execution_id: i64,
        node_id: impl Into<String>,
        action: serde_json::Value,
        context: serde_json::Value,
        catalog_id: i64,
    ) -> Self {
        let node_id = node_id.into();
        let idempotency_key = format!("{}:{}", execution_id, node_id);
        Self {
            execution_id,
            node_id,
            action,
            context,
            catalog_id,
            priority: 0,
            max_attempts: None,
            available_at: None,
            worker_pool_label: None,
            idempotency_key: Some(idempotency_key),
        }
    }
}

/// Worker lease request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Worker identity.
    pub worker_id: String,
    /// Worker pool name.
    pub pool: String,
    /// Action types this worker can execute.
    pub capabilities: Vec<String>,
    /// Requested lease duration.
    pub lease_duration_seconds: Option<u64>,
}

/// Retry policy applied when a job fails or its lease expires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff base in seconds.
    pub backoff_base_seconds: f64,
    /// Backoff ceiling in seconds.
    pub backoff_cap_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_seconds: 2.0,
            backoff_cap_seconds: 300.0,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter: `base * 2^attempts * (1 +/- 0.25)`,
    /// capped at the configured ceiling.
    pub fn backoff_seconds(&self, attempts: i32) -> f64 {
        let exp = self.backoff_base_seconds * 2f64.powi(attempts.max(0));
        let jitter = 0.75 + rand::random::<f64>() * 0.5;
        (exp * jitter).min(self.backoff_cap_seconds)
    }
}

/// Outcome of failing a leased job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FailOutcome {
    /// Job re-queued with a retry delay.
    Requeued { available_at: DateTime<Utc> },
    /// Retries exhausted or failure declared permanent.
    DeadLettered,
}

/// Queue job response for the API. All IDs are serialized as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJobResponse {
    pub queue_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub action: serde_json::Value,
    pub context: serde_json::Value,
    pub catalog_id: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl From<QueueJob> for QueueJobResponse {
    fn from(job: QueueJob) -> Self {
        Self {
            queue_id: job.queue_id.to_string(),
            execution_id: job.execution_id.to_string(),
            node_id: job.node_id,
            action: job.action,
            context: job.context,
            catalog_id: job.catalog_id.to_string(),
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            lease_expires_at: job.lease_expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Leased,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::DeadLetter,
        ] {
            assert_eq!(JobStatus::from(status.as_str()), status);
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::DeadLetter.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Leased.is_terminal());
    }

    #[test]
    fn test_job_spec_idempotency_key() {
        let spec = QueueJobSpec::new(
            42,
            "fetch_data",
            serde_json::json!({"kind": "http"}),
            serde_json::json!({}),
            1,
        );
        assert_eq!(spec.idempotency_key.as_deref(), Some("42:fetch_data"));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            backoff_base_seconds: 2.0,
            backoff_cap_seconds: 60.0,
        };

        // base * 2^1 = 4s, jittered into [3, 5]
        let b1 = policy.backoff_seconds(1);
        assert!((3.0..=5.0).contains(&b1), "b1 = {}", b1);

        // base * 2^3 = 16s, jittered into [12, 20]
        let b3 = policy.backoff_seconds(3);
        assert!((12.0..=20.0).contains(&b3), "b3 = {}", b3);

        // Far beyond the cap: always clamped
        let b20 = policy.backoff_seconds(20);
        assert!(b20 <= 60.0);
    }

    #[test]
    fn test_action_kind() {
        let job = QueueJob {
            queue_id: 1,
            execution_id: 1,
            node_id: "n".to_string(),
            action: serde_json::json!({"kind": "http", "url": "https://example.com"}),
            context: serde_json::json!({}),
            catalog_id: 1,
            status: "queued".to_string(),
            lease_holder: None,
            lease_expires_at: None,
            attempts: 0,
            max_attempts: 3,
            priority: 0,
            available_at: Utc::now(),
            worker_pool_label: None,
            idempotency_key: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(job.action_kind(), Some("http"));
    }
}
