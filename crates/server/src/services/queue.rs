//! Queue service: lease lifecycle operations plus the event emission tied
//! to them.
//!
//! Terminal job events (`action_completed`, `action_failed`,
//! `loop_iteration`) are appended here, after the queue transition has
//! verified the caller's lease. A worker whose lease was reclaimed gets
//! `LeaseLost` before any event is written, which is what guarantees
//! exactly one terminal event per job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::models::{
    EventAppendRequest, EventStatus, EventType, FailOutcome, LeaseRequest, QueueJob, RetryPolicy,
};
use crate::db::queries::{event as event_queries, queue as queue_queries};
use crate::db::DbPool;
use crate::engine::Broker;
use crate::error::{AppError, AppResult};

/// Body of a job completion report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: String,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Body of a job failure report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRequest {
    pub worker_id: String,
    pub error: String,
    /// Failure classification; transient and timeout failures retry.
    #[serde(default = "default_failure_kind")]
    pub failure_kind: String,
}

fn default_failure_kind() -> String {
    "transient".to_string()
}

/// Queue lifecycle service.
#[derive(Clone)]
pub struct QueueService {
    db: DbPool,
    config: Arc<AppConfig>,
    broker: Broker,
}

impl QueueService {
    pub fn new(db: DbPool, config: Arc<AppConfig>, broker: Broker) -> Self {
        Self { db, config, broker }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_base_seconds: self.config.backoff_base_seconds,
            backoff_cap_seconds: self.config.backoff_cap_seconds,
        }
    }

    /// Lease one job for a worker.
    pub async fn lease(&self, request: &LeaseRequest) -> AppResult<Option<QueueJob>> {
        if request.capabilities.is_empty() {
            return Err(AppError::Validation(
                "Worker declared no capabilities".to_string(),
            ));
        }

        let lease_duration = request
            .lease_duration_seconds
            .unwrap_or(self.config.lease_duration_seconds);

        let job = queue_queries::lease(
            &self.db,
            &request.worker_id,
            &request.pool,
            &request.capabilities,
            lease_duration,
        )
        .await?;

        if let Some(job) = &job {
            tracing::debug!(
                queue_id = job.queue_id,
                execution_id = job.execution_id,
                node_id = %job.node_id,
                worker_id = %request.worker_id,
                attempts = job.attempts,
                "Job leased"
            );
        }

        Ok(job)
    }

    /// Extend a worker's lease.
    pub async fn heartbeat(
        &self,
        queue_id: i64,
        worker_id: &str,
        lease_duration_seconds: Option<u64>,
    ) -> AppResult<chrono::DateTime<chrono::Utc>> {
        let duration = lease_duration_seconds.unwrap_or(self.config.lease_duration_seconds);
        queue_queries::heartbeat(&self.db, queue_id, worker_id, duration).await
    }

    /// Complete a leased job and append its terminal event.
    pub async fn complete(&self, queue_id: i64, request: &CompleteRequest) -> AppResult<()> {
        let job = self.require_job(queue_id).await?;

        // The lease check happens inside the transition; a reclaimed lease
        // returns LeaseLost and nothing is emitted.
        queue_queries::complete(&self.db, queue_id, &request.worker_id).await?;

        let mut event = match iteration_marker(&job) {
            Some((index, _)) => EventAppendRequest::new(
                job.execution_id,
                EventType::LoopIteration,
                &job.node_id,
                EventStatus::Completed,
            )
            .with_payload(serde_json::json!({
                "index": index,
                "result": request.result,
                "status": "completed",
            })),
            None => EventAppendRequest::new(
                job.execution_id,
                EventType::ActionCompleted,
                &job.node_id,
                EventStatus::Completed,
            )
            .with_payload(serde_json::json!({
                "result": request.result,
                "duration_ms": request.duration_ms,
            })),
        };

        // The terminal event points back at the node's latest event,
        // typically its action_started.
        if let Some(previous) =
            event_queries::get_latest_event_by_node(&self.db, job.execution_id, &job.node_id)
                .await?
        {
            event = event.with_parent(previous.event_id);
        }

        event_queries::append_event(
            &self.db,
            &event.with_idempotency_key(format!("job_terminal:{}", queue_id)),
        )
        .await?;

        self.broker.evaluate(job.execution_id).await?;
        Ok(())
    }

    /// Fail a leased job: retryable failures re-queue with backoff, the
    /// rest dead-letter with a terminal failure event.
    pub async fn fail(&self, queue_id: i64, request: &FailRequest) -> AppResult<FailOutcome> {
        let job = self.require_job(queue_id).await?;

        let retryable = matches!(request.failure_kind.as_str(), "transient" | "timeout");
        let outcome = queue_queries::fail(
            &self.db,
            queue_id,
            &request.worker_id,
            &request.error,
            retryable,
            &self.retry_policy(),
        )
        .await?;

        // A retryable attempt failure is recorded with in_progress status:
        // visible in the log, not terminal for the node.
        if retryable && iteration_marker(&job).is_none() {
            event_queries::append_event(
                &self.db,
                &EventAppendRequest::new(
                    job.execution_id,
                    EventType::ActionFailed,
                    &job.node_id,
                    EventStatus::InProgress,
                )
                .with_payload(serde_json::json!({
                    "error": request.error,
                    "failure_kind": request.failure_kind,
                    "attempts": job.attempts,
                }))
                .with_idempotency_key(format!("action_failed:{}:{}", queue_id, job.attempts)),
            )
            .await?;
        }

        match &outcome {
            FailOutcome::Requeued { available_at } => {
                tracing::debug!(
                    queue_id,
                    execution_id = job.execution_id,
                    available_at = %available_at,
                    "Job re-queued with backoff"
                );
            }
            FailOutcome::DeadLettered => {
                let failure_kind = if retryable {
                    "retry_exhausted"
                } else {
                    request.failure_kind.as_str()
                };
                self.emit_dead_letter(&job, &request.error, failure_kind)
                    .await?;
                self.broker.evaluate(job.execution_id).await?;
            }
        }

        Ok(outcome)
    }

    /// Reap expired leases, emitting failure events for jobs that ran out
    /// of attempts. Returns the number of jobs reclaimed.
    pub async fn reap_expired(&self) -> AppResult<u64> {
        let result = queue_queries::reap_expired(&self.db, &self.retry_policy()).await?;

        if result.total() > 0 {
            tracing::info!(
                requeued = result.requeued,
                dead_lettered = result.dead_lettered.len(),
                "Reaped expired leases"
            );
        }

        for job in &result.dead_lettered {
            self.emit_dead_letter(job, "lease expired; retries exhausted", "retry_exhausted")
                .await?;
            self.broker.evaluate(job.execution_id).await?;
        }

        Ok(result.total())
    }

    /// Get a job by id.
    pub async fn get_job(&self, queue_id: i64) -> AppResult<QueueJob> {
        self.require_job(queue_id).await
    }

    async fn require_job(&self, queue_id: i64) -> AppResult<QueueJob> {
        queue_queries::get_job(&self.db, queue_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {}", queue_id)))
    }

    async fn emit_dead_letter(
        &self,
        job: &QueueJob,
        error: &str,
        failure_kind: &str,
    ) -> AppResult<()> {
        let event = match iteration_marker(job) {
            Some((index, _)) => EventAppendRequest::new(
                job.execution_id,
                EventType::LoopIteration,
                &job.node_id,
                EventStatus::Failed,
            )
            .with_payload(serde_json::json!({
                "index": index,
                "error": error,
                "status": "failed",
            })),
            None => EventAppendRequest::new(
                job.execution_id,
                EventType::ActionFailed,
                &job.node_id,
                EventStatus::Failed,
            )
            .with_payload(serde_json::json!({
                "error": error,
                "failure_kind": failure_kind,
                "attempts": job.attempts,
            })),
        };

        event_queries::append_event(
            &self.db,
            &event.with_idempotency_key(format!("job_terminal:{}", job.queue_id)),
        )
        .await?;

        Ok(())
    }
}

/// Loop iteration marker a job's context carries: `(index, expected)`.
fn iteration_marker(job: &QueueJob) -> Option<(u64, u64)> {
    let marker = job.context.get("_iteration")?;
    let index = marker.get("index")?.as_u64()?;
    let expected = marker.get("expected")?.as_u64()?;
    Some((index, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_job(context: serde_json::Value) -> QueueJob {
        QueueJob {
            queue_id: 1,
            execution_id: 2,
            node_id: "iter#1".to_string(),
            action: serde_json::json!({"kind": "http"}),
            context,
            catalog_id: 3,
            status: "leased".to_string(),
            lease_holder: Some("worker-1".to_string()),
            lease_expires_at: None,
            attempts: 1,
            max_attempts: 3,
            priority: 0,
            available_at: Utc::now(),
            worker_pool_label: None,
            idempotency_key: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_iteration_marker_present() {
        let job = make_job(serde_json::json!({
            "_iteration": {"step": "iter", "index": 1, "expected": 3}
        }));
        assert_eq!(iteration_marker(&job), Some((1, 3)));
    }

    #[test]
    fn test_iteration_marker_absent() {
        let job = make_job(serde_json::json!({"element": 10}));
        assert_eq!(iteration_marker(&job), None);
    }

    #[test]
    fn test_fail_request_default_kind() {
        let request: FailRequest =
            serde_json::from_str(r#"{"worker_id": "w", "error": "boom"}"#).unwrap();
        assert_eq!(request.failure_kind, "transient");
    }
}
