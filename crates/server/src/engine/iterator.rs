//! Loop coordination: iterator fan-out and fan-in.
//!
//! Fan-out expands an iterator step into N iteration jobs with synthesized
//! node ids `<step>#<index>`. Fan-in watches `loop_iteration` events and
//! emits exactly one `loop_aggregated` event per step, enforced by the
//! event log's idempotency key rather than in-memory coordination, because
//! concurrent evaluators may observe the Nth completion simultaneously.

use std::collections::HashMap;

use crate::db::models::{EventAppendRequest, EventStatus, EventType, QueueJobSpec};
use crate::db::queries::{event as event_queries, queue as queue_queries};
use crate::db::DbPool;
use crate::engine::evaluator::ConditionEvaluator;
use crate::engine::state::ExecutionSnapshot;
use crate::error::{AppError, AppResult};
use crate::playbook::{IteratorMode, IteratorSpec, Step};

/// Synthesize the node id for one iteration.
pub fn iteration_node_id(step_name: &str, index: usize) -> String {
    format!("{}#{}", step_name, index)
}

/// The at-most-once key for a step's aggregation event.
pub fn aggregation_key(execution_id: i64, step_name: &str) -> String {
    format!("loop_agg:{}:{}", execution_id, step_name)
}

/// Loop coordinator. Stateless; all loop progress is read back from the
/// event log on every pass.
pub struct LoopCoordinator<'a> {
    pool: &'a DbPool,
    evaluator: &'a ConditionEvaluator,
    default_max_attempts: i32,
}

impl<'a> LoopCoordinator<'a> {
    pub fn new(
        pool: &'a DbPool,
        evaluator: &'a ConditionEvaluator,
        default_max_attempts: i32,
    ) -> Self {
        Self {
            pool,
            evaluator,
            default_max_attempts,
        }
    }

    /// Expand a runnable iterator step.
    ///
    /// Emits the step's `step_started` event carrying the expected count
    /// and the evaluated elements, then enqueues iteration jobs: all of
    /// them in parallel mode, only iteration 0 in sequential mode. An
    /// empty collection aggregates immediately with an empty result.
    pub async fn fan_out(
        &self,
        execution_id: i64,
        catalog_id: i64,
        step: &Step,
        spec: &IteratorSpec,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<()> {
        let elements = self
            .evaluator
            .evaluate_collection(&spec.collection, environment)?;
        let expected = elements.len();

        let started = event_queries::append_event(
            self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::StepStarted,
                &step.step,
                EventStatus::Started,
            )
            .with_payload(serde_json::json!({
                "expected": expected,
                "elements": elements,
                "mode": spec.mode,
            }))
            .with_idempotency_key(format!("step_started:{}", step.step)),
        )
        .await?;

        tracing::info!(
            execution_id,
            step = %step.step,
            expected,
            mode = ?spec.mode,
            "Iterator fan-out"
        );

        if expected == 0 {
            event_queries::append_event(
                self.pool,
                &EventAppendRequest::new(
                    execution_id,
                    EventType::LoopAggregated,
                    &step.step,
                    EventStatus::Completed,
                )
                .with_payload(serde_json::json!({"result": [], "count": 0, "failures": 0}))
                .with_parent(started.event_id)
                .with_idempotency_key(aggregation_key(execution_id, &step.step)),
            )
            .await?;
            return Ok(());
        }

        let to_dispatch: Vec<usize> = match spec.mode {
            IteratorMode::Parallel => (0..expected).collect(),
            IteratorMode::Sequential => vec![0],
        };

        for index in to_dispatch {
            self.enqueue_iteration(
                execution_id,
                catalog_id,
                step,
                spec,
                environment,
                &elements,
                index,
                Some(started.event_id),
            )
            .await?;
        }

        Ok(())
    }

    /// One pass of loop bookkeeping for a started iterator step.
    ///
    /// Advances a sequential loop when the previous iteration finished and
    /// performs fan-in when all iterations are accounted for. Returns true
    /// if the step's aggregation event exists after this pass.
    pub async fn observe(
        &self,
        execution_id: i64,
        catalog_id: i64,
        step: &Step,
        spec: &IteratorSpec,
        snapshot: &ExecutionSnapshot,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<bool> {
        if snapshot.is_node_completed(&step.step) {
            return Ok(true);
        }

        let Some(node) = snapshot.node(&step.step) else {
            return Ok(false);
        };
        let Some(payload) = &node.started_payload else {
            return Ok(false);
        };

        let expected = payload
            .get("expected")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let elements: Vec<serde_json::Value> = payload
            .get("elements")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let started_event_id = node.started_event_id;

        // Collect per-iteration terminal observations in index order. A
        // node only counts once its latest event is `loop_iteration`;
        // `action_started` or a retryable attempt failure leave it in
        // flight.
        let mut finished = 0usize;
        let mut failures = 0usize;
        let mut results: Vec<serde_json::Value> = Vec::with_capacity(expected);
        for index in 0..expected {
            let node_id = iteration_node_id(&step.step, index);
            match snapshot.node(&node_id) {
                Some(iteration) if iteration.latest_type == EventType::LoopIteration => {
                    finished += 1;
                    if iteration.latest_status == EventStatus::Failed.as_str() {
                        failures += 1;
                        results.push(serde_json::json!({
                            "error": iteration.error.clone().unwrap_or_else(|| "iteration failed".to_string())
                        }));
                    } else {
                        results.push(iteration.result.clone().unwrap_or(serde_json::Value::Null));
                    }
                }
                _ => results.push(serde_json::Value::Null),
            }
        }

        // Early exit: a failed iteration aborts the loop when failures are
        // not tolerated. Remaining queued iterations are cancelled and the
        // aggregation is emitted with failed status.
        if !spec.continue_on_failure && failures > 0 {
            queue_queries::cancel_queued_by_prefix(
                self.pool,
                execution_id,
                &format!("{}#", step.step),
            )
            .await?;

            return self
                .emit_aggregated(
                    execution_id,
                    &step.step,
                    EventStatus::Failed,
                    results,
                    expected,
                    failures,
                    started_event_id,
                )
                .await;
        }

        // Sequential progression: the next index is enqueued only once
        // every earlier iteration has its terminal event. Enqueue
        // idempotency makes a duplicate pass harmless.
        if spec.mode == IteratorMode::Sequential && finished < expected {
            self.enqueue_iteration(
                execution_id,
                catalog_id,
                step,
                spec,
                environment,
                &elements,
                finished,
                started_event_id,
            )
            .await?;
        }

        if finished < expected {
            return Ok(false);
        }

        self.emit_aggregated(
            execution_id,
            &step.step,
            EventStatus::Completed,
            results,
            expected,
            failures,
            started_event_id,
        )
        .await
    }

    /// Render one iteration's body and enqueue its job.
    #[allow(clippy::too_many_arguments)]
    async fn enqueue_iteration(
        &self,
        execution_id: i64,
        catalog_id: i64,
        step: &Step,
        spec: &IteratorSpec,
        environment: &HashMap<String, serde_json::Value>,
        elements: &[serde_json::Value],
        index: usize,
        parent_event_id: Option<i64>,
    ) -> AppResult<()> {
        let node_id = iteration_node_id(&step.step, index);
        let element = elements.get(index).cloned().ok_or_else(|| {
            AppError::Internal(format!(
                "Iteration index {} out of bounds for step {}",
                index, step.step
            ))
        })?;

        let mut scoped = environment.clone();
        scoped.insert(spec.element.clone(), element);
        scoped.insert(spec.index.clone(), serde_json::json!(index));

        // Render the body with the element and index bound. A rendering
        // error fails just this iteration, not the whole fan-out.
        let action = match self.render_action(spec, &scoped) {
            Ok(action) => action,
            Err(AppError::Template(message)) => {
                let mut request = EventAppendRequest::new(
                    execution_id,
                    EventType::LoopIteration,
                    &node_id,
                    EventStatus::Failed,
                )
                .with_payload(serde_json::json!({
                    "index": index,
                    "error": message,
                    "status": "failed",
                }))
                .with_idempotency_key(format!("loop_iter_render:{}", node_id));
                if let Some(parent) = parent_event_id {
                    request = request.with_parent(parent);
                }
                event_queries::append_event(self.pool, &request).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut context = serde_json::Map::new();
        for (k, v) in &scoped {
            context.insert(k.clone(), v.clone());
        }
        context.insert(
            "_iteration".to_string(),
            serde_json::json!({
                "step": step.step,
                "index": index,
                "expected": elements.len(),
            }),
        );

        let mut job = QueueJobSpec::new(
            execution_id,
            node_id,
            action,
            serde_json::Value::Object(context),
            catalog_id,
        );
        job.max_attempts = Some(self.default_max_attempts);

        queue_queries::enqueue(self.pool, &job, self.default_max_attempts).await?;
        Ok(())
    }

    fn render_action(
        &self,
        spec: &IteratorSpec,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<serde_json::Value> {
        let raw = serde_json::to_value(&spec.tool)?;
        self.evaluator.renderer().render_value(&raw, environment)
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_aggregated(
        &self,
        execution_id: i64,
        step_name: &str,
        status: EventStatus,
        results: Vec<serde_json::Value>,
        count: usize,
        failures: usize,
        parent_event_id: Option<i64>,
    ) -> AppResult<bool> {
        let mut request = EventAppendRequest::new(
            execution_id,
            EventType::LoopAggregated,
            step_name,
            status,
        )
        .with_payload(serde_json::json!({
            "result": results,
            "count": count,
            "failures": failures,
        }))
        .with_idempotency_key(aggregation_key(execution_id, step_name));

        if let Some(parent) = parent_event_id {
            request = request.with_parent(parent);
        }

        event_queries::append_event(self.pool, &request).await?;

        tracing::info!(
            execution_id,
            step = %step_name,
            count,
            failures,
            "Loop aggregated"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_node_id() {
        assert_eq!(iteration_node_id("process", 0), "process#0");
        assert_eq!(iteration_node_id("process", 12), "process#12");
    }

    #[test]
    fn test_aggregation_key_shape() {
        assert_eq!(aggregation_key(42, "iter"), "loop_agg:42:iter");
    }
}
