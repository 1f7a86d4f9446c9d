//! The broker: event-log to runnable-steps resolution.
//!
//! `evaluate` is a pure function of the event log plus the catalog: it
//! folds the log, decides which steps are now runnable, and emits the
//! resulting events and jobs. Every emission carries an idempotency key,
//! so two concurrent evaluators reaching the same decisions are absorbed
//! by the storage layer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::models::{
    EventAppendRequest, EventStatus, EventType, Execution, ExecutionStatus, QueueJobSpec,
};
use crate::db::queries::{
    catalog as catalog_queries, event as event_queries, execution as execution_queries,
    queue as queue_queries, workload as workload_queries,
};
use crate::db::DbPool;
use crate::engine::evaluator::ConditionEvaluator;
use crate::engine::iterator::LoopCoordinator;
use crate::engine::state::ExecutionSnapshot;
use crate::error::{AppError, AppResult};
use crate::playbook::{
    parse_playbook, NextSpec, Playbook, Step, StepBody, SubPlaybookSpec, START_STEP,
};

/// Parent linkage for sub-playbook executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentRef {
    pub execution_id: i64,
    pub step: String,
    pub event_id: i64,
}

/// Request to start an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// Catalog entry id; takes precedence over path.
    pub catalog_id: Option<i64>,
    /// Catalog path, resolved to the latest version unless pinned.
    pub path: Option<String>,
    /// Catalog version.
    pub version: Option<String>,
    /// Initial parameters, merged over the playbook's default workload.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Parent triple for sub-playbook calls.
    pub parent: Option<ParentRef>,
}

/// Follow-up work discovered by an evaluation pass.
enum FollowUp {
    /// Evaluate another execution (a freshly started child, or the parent
    /// of an execution that just reached a terminal state).
    Evaluate(i64),
}

/// Outcome of one evaluation pass.
struct PassOutcome {
    /// Whether the pass appended any new event.
    appended: bool,
    follow_ups: Vec<FollowUp>,
}

/// Safety bound on fixpoint passes per evaluate call.
const MAX_PASSES: usize = 64;

/// The broker.
#[derive(Clone)]
pub struct Broker {
    pool: DbPool,
    config: Arc<AppConfig>,
    evaluator: Arc<ConditionEvaluator>,
}

impl Broker {
    pub fn new(pool: DbPool, config: Arc<AppConfig>) -> Self {
        Self {
            pool,
            config,
            evaluator: Arc::new(ConditionEvaluator::new()),
        }
    }

    /// Start a new execution and run evaluation until quiescent.
    pub async fn start_execution(&self, request: &StartRequest) -> AppResult<Execution> {
        let catalog = self.resolve_catalog(request).await?;
        let playbook = parse_playbook(&catalog.content)?;
        let workload = playbook.merged_workload(&request.parameters);

        let execution_id = execution_queries::next_id(&self.pool).await?;
        let (parent_execution_id, parent_step, parent_event_id) = match &request.parent {
            Some(parent) => (
                Some(parent.execution_id),
                Some(parent.step.as_str()),
                Some(parent.event_id),
            ),
            None => (None, None, None),
        };

        let execution = execution_queries::create_execution(
            &self.pool,
            execution_id,
            catalog.catalog_id,
            &workload,
            parent_execution_id,
            parent_step,
            parent_event_id,
        )
        .await?;

        // The workload is persisted before any job exists, so a crash
        // after this point can always re-fold.
        workload_queries::init(&self.pool, execution_id, &workload).await?;

        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::ExecutionStart,
                &catalog.path,
                EventStatus::Started,
            )
            .with_payload(serde_json::json!({
                "path": catalog.path,
                "version": catalog.version,
                "catalog_id": catalog.catalog_id.to_string(),
                "parent_execution_id": parent_execution_id.map(|id| id.to_string()),
            }))
            .with_context(workload.clone())
            .with_idempotency_key("execution_start"),
        )
        .await?;

        tracing::info!(
            execution_id,
            path = %catalog.path,
            version = %catalog.version,
            "Execution started"
        );

        self.evaluate(execution_id).await?;
        Ok(execution)
    }

    /// Run evaluation passes for an execution (and any executions they
    /// cascade into) until no pass appends a new event.
    ///
    /// Cascades are processed iteratively through a work queue: children
    /// started by a pass get their first evaluation, and an execution that
    /// reaches a terminal state queues its parent. No recursion.
    pub async fn evaluate(&self, execution_id: i64) -> AppResult<()> {
        let mut queue = VecDeque::from([execution_id]);
        let mut runs: HashMap<i64, usize> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            let entry = runs.entry(current).or_insert(0);
            if *entry >= MAX_PASSES {
                tracing::warn!(
                    execution_id = current,
                    "Evaluation did not reach a fixpoint; deferring"
                );
                continue;
            }
            *entry += 1;

            let mut passes = 0;
            loop {
                passes += 1;
                let outcome = self.single_pass(current).await?;
                for FollowUp::Evaluate(id) in outcome.follow_ups {
                    if id != current && !queue.contains(&id) {
                        queue.push_back(id);
                    }
                }
                if !outcome.appended || passes >= MAX_PASSES {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Cancel an execution: emits the terminal event, blocks future
    /// scheduling, and makes in-flight jobs reapable.
    pub async fn cancel_execution(&self, execution_id: i64, reason: &str) -> AppResult<()> {
        let execution = execution_queries::get_execution(&self.pool, execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution not found: {}", execution_id)))?;

        if ExecutionStatus::from(execution.status.as_str()).is_terminal() {
            return Ok(());
        }

        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::ExecutionCancelled,
                "execution",
                EventStatus::Cancelled,
            )
            .with_payload(serde_json::json!({"reason": reason}))
            .with_idempotency_key("execution_cancelled"),
        )
        .await?;

        execution_queries::set_terminal_status(
            &self.pool,
            execution_id,
            ExecutionStatus::Cancelled.as_str(),
            chrono::Utc::now(),
        )
        .await?;

        let cancelled_jobs = queue_queries::cancel_execution_jobs(&self.pool, execution_id).await?;

        tracing::info!(execution_id, reason, cancelled_jobs, "Execution cancelled");

        // The parent observes the cancellation like any other terminal
        // state.
        if let Some(parent_id) = execution.parent_execution_id {
            self.evaluate(parent_id).await?;
        }

        Ok(())
    }

    async fn resolve_catalog(
        &self,
        request: &StartRequest,
    ) -> AppResult<crate::db::models::Catalog> {
        if let Some(catalog_id) = request.catalog_id {
            return catalog_queries::get_by_id(&self.pool, catalog_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Catalog entry not found: {}", catalog_id))
                });
        }

        let path = request.path.as_deref().ok_or_else(|| {
            AppError::Validation("Either 'catalog_id' or 'path' must be provided".to_string())
        })?;

        catalog_queries::get_by_path_version(&self.pool, path, request.version.as_deref())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playbook not found: {}", path)))
    }

    /// One evaluation pass over a single execution.
    async fn single_pass(&self, execution_id: i64) -> AppResult<PassOutcome> {
        let mut outcome = PassOutcome {
            appended: false,
            follow_ups: Vec::new(),
        };

        let Some(execution) = execution_queries::get_execution(&self.pool, execution_id).await?
        else {
            return Err(AppError::NotFound(format!(
                "Execution not found: {}",
                execution_id
            )));
        };

        if ExecutionStatus::from(execution.status.as_str()) == ExecutionStatus::Cancelled {
            return Ok(outcome);
        }

        let catalog = catalog_queries::get_by_id(&self.pool, execution.catalog_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Catalog entry not found: {}", execution.catalog_id))
            })?;

        let playbook = match parse_playbook(&catalog.content) {
            Ok(playbook) => playbook,
            Err(e) => {
                self.emit_execution_failed(&execution, &format!("Catalog error: {}", e))
                    .await?;
                outcome.appended = true;
                if let Some(parent_id) = execution.parent_execution_id {
                    outcome.follow_ups.push(FollowUp::Evaluate(parent_id));
                }
                return Ok(outcome);
            }
        };

        let events = event_queries::get_events(&self.pool, execution_id, 0).await?;
        let snapshot = ExecutionSnapshot::from_events(execution_id, &events);
        let events_before = snapshot.event_count;

        if snapshot.status.is_terminal() {
            self.sync_terminal_status(&execution, &snapshot).await?;
            if let Some(parent_id) = execution.parent_execution_id {
                outcome.follow_ups.push(FollowUp::Evaluate(parent_id));
            }
            return Ok(outcome);
        }

        let workload = workload_queries::get(&self.pool, execution_id)
            .await?
            .unwrap_or_else(|| execution.workload.clone());
        let environment = snapshot.build_environment(&workload);

        // Loop bookkeeping: sequential progression and fan-in for every
        // started, not-yet-aggregated iterator step.
        let coordinator =
            LoopCoordinator::new(&self.pool, &self.evaluator, self.config.max_attempts);
        for step in &playbook.workflow {
            if let StepBody::Iterator(spec) = step.body() {
                if snapshot.is_started(&step.step) && !snapshot.is_node_completed(&step.step) {
                    coordinator
                        .observe(
                            execution_id,
                            execution.catalog_id,
                            step,
                            spec,
                            &snapshot,
                            &environment,
                        )
                        .await?;
                }
            }
        }

        // Sub-playbook bookkeeping: a child's terminal state becomes this
        // step's action event.
        for step in &playbook.workflow {
            if let StepBody::Playbook(spec) = step.body() {
                if snapshot.is_started(&step.step)
                    && !snapshot.is_node_completed(&step.step)
                    && !snapshot.is_node_failed(&step.step)
                {
                    self.absorb_child_result(&execution, step, spec).await?;
                }
            }
        }

        // Transitions out of completed steps, and failure routing.
        for step in &playbook.workflow {
            if self.step_is_complete(&snapshot, step) && !snapshot.is_node_skipped(&step.step) {
                self.emit_transitions(&execution, step, &snapshot, &environment)
                    .await?;
            }
            if snapshot.is_node_failed(&step.step) {
                if let Some(on_failure) = &step.on_failure {
                    if !snapshot.transition_taken(&step.step, on_failure) {
                        self.emit_transition_event(
                            execution_id,
                            &step.step,
                            on_failure,
                            false,
                            "on_failure",
                        )
                        .await?;
                    }
                }
            }
        }

        // Re-fold to pick up transitions emitted above before resolving
        // runnable steps.
        let events = event_queries::get_events(&self.pool, execution_id, 0).await?;
        let snapshot = ExecutionSnapshot::from_events(execution_id, &events);
        let environment = snapshot.build_environment(&workload);

        self.resolve_runnable(&execution, &playbook, &snapshot, &environment, &coordinator)
            .await?;

        // Save post-hook: persist `save` blocks of completed steps.
        self.apply_save_blocks(&execution, &playbook, &snapshot, &environment)
            .await?;

        // Terminal detection runs against the final fold of this pass.
        let events = event_queries::get_events(&self.pool, execution_id, 0).await?;
        let snapshot = ExecutionSnapshot::from_events(execution_id, &events);
        if !snapshot.status.is_terminal() {
            if let Some(parent_notify) = self
                .detect_terminal(&execution, &playbook, &snapshot)
                .await?
            {
                outcome.follow_ups.push(FollowUp::Evaluate(parent_notify));
            }
        } else {
            self.sync_terminal_status(&execution, &snapshot).await?;
            if let Some(parent_id) = execution.parent_execution_id {
                outcome.follow_ups.push(FollowUp::Evaluate(parent_id));
            }
        }

        let events_after = event_queries::count_events(&self.pool, execution_id).await? as usize;
        outcome.appended = events_after > events_before;

        // Children started in this pass need their own first evaluation.
        for id in self.children_pending_evaluation(&execution).await? {
            outcome.follow_ups.push(FollowUp::Evaluate(id));
        }

        Ok(outcome)
    }

    /// Whether a step counts as completed for dependency purposes. Marker
    /// steps (no body) complete as soon as they are dispatched.
    fn step_is_complete(&self, snapshot: &ExecutionSnapshot, step: &Step) -> bool {
        if snapshot.is_node_completed(&step.step) {
            return true;
        }
        matches!(step.body(), StepBody::None) && snapshot.is_started(&step.step)
    }

    /// Whether a step is done in any way: completed, skipped, or failed.
    fn step_is_done(&self, snapshot: &ExecutionSnapshot, step: &Step) -> bool {
        self.step_is_complete(snapshot, step) || snapshot.is_node_failed(&step.step)
    }

    /// Whether a step is started but not done.
    fn step_in_flight(&self, snapshot: &ExecutionSnapshot, step: &Step) -> bool {
        snapshot.is_started(&step.step) && !self.step_is_done(snapshot, step)
    }

    /// Emit missing transition events out of a completed step.
    async fn emit_transitions(
        &self,
        execution: &Execution,
        step: &Step,
        snapshot: &ExecutionSnapshot,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<()> {
        let evaluation = match self.evaluator.evaluate_next(step, environment) {
            Ok(evaluation) => evaluation,
            Err(AppError::Template(message)) => {
                self.emit_predicate_failure(execution.execution_id, &step.step, &message)
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for decision in &evaluation.decisions {
            if !snapshot.transition_taken(&step.step, &decision.target) {
                self.emit_transition_event(
                    execution.execution_id,
                    &step.step,
                    &decision.target,
                    decision.when_result,
                    &decision.branch,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn emit_transition_event(
        &self,
        execution_id: i64,
        from: &str,
        to: &str,
        when_result: bool,
        branch: &str,
    ) -> AppResult<()> {
        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(execution_id, EventType::Transition, from, EventStatus::Completed)
                .with_payload(serde_json::json!({
                    "from": from,
                    "to": to,
                    "when_result": when_result,
                    "branch": branch,
                }))
                .with_idempotency_key(format!("transition:{}:{}", from, to)),
        )
        .await?;

        tracing::debug!(execution_id, from, to, branch, "Transition");
        Ok(())
    }

    /// Resolve and dispatch runnable steps, and propagate skips.
    async fn resolve_runnable(
        &self,
        execution: &Execution,
        playbook: &Playbook,
        snapshot: &ExecutionSnapshot,
        environment: &HashMap<String, serde_json::Value>,
        coordinator: &LoopCoordinator<'_>,
    ) -> AppResult<()> {
        for step in &playbook.workflow {
            if snapshot.is_started(&step.step) {
                continue;
            }

            let parents = potential_parents(playbook, &step.step);

            let runnable = if step.step == START_STEP {
                // The entry step depends only on the execution start.
                true
            } else if parents.is_empty() {
                // Orphan steps are never scheduled.
                false
            } else if snapshot.has_inbound_transition(&step.step) {
                // Dependencies are the activated parents, scoped by the
                // branches actually taken; an in-flight parent may still
                // transition here, so wait for it.
                !parents
                    .iter()
                    .any(|parent| self.step_in_flight(snapshot, parent))
            } else {
                // No taken edge targets this step. Once every parent is
                // done without routing here, the step is unreachable and
                // skips, which lets downstream joins settle.
                let all_parents_done = parents
                    .iter()
                    .all(|parent| self.step_is_done(snapshot, parent));
                if all_parents_done {
                    self.emit_skipped(execution.execution_id, &step.step).await?;
                }
                false
            };

            if !runnable {
                continue;
            }

            // The step's own enable guard.
            match self.evaluator.evaluate_step_when(step, environment) {
                Ok(true) => {}
                Ok(false) => {
                    self.emit_skipped(execution.execution_id, &step.step).await?;
                    continue;
                }
                Err(AppError::Template(message)) => {
                    self.emit_predicate_failure(execution.execution_id, &step.step, &message)
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            // Backpressure: defer dispatch while the execution's queued
            // backlog is at the ceiling; the next evaluation retries.
            let queued = queue_queries::count_queued(&self.pool, execution.execution_id).await?;
            if queued >= self.config.queue_ceiling_per_execution {
                tracing::warn!(
                    execution_id = execution.execution_id,
                    step = %step.step,
                    queued,
                    "Enqueue deferred: queue ceiling reached"
                );
                continue;
            }

            self.dispatch_step(execution, step, environment, coordinator)
                .await?;
        }

        Ok(())
    }

    /// Dispatch one runnable step according to its body.
    async fn dispatch_step(
        &self,
        execution: &Execution,
        step: &Step,
        environment: &HashMap<String, serde_json::Value>,
        coordinator: &LoopCoordinator<'_>,
    ) -> AppResult<()> {
        match step.body() {
            StepBody::Iterator(spec) => {
                // The coordinator emits step_started itself, recording the
                // fan-out size.
                coordinator
                    .fan_out(
                        execution.execution_id,
                        execution.catalog_id,
                        step,
                        spec,
                        environment,
                    )
                    .await?;
            }
            StepBody::None => {
                self.emit_step_started(execution.execution_id, step, environment)
                    .await?;
            }
            StepBody::Action(spec) => {
                let started = self
                    .emit_step_started(execution.execution_id, step, environment)
                    .await?;

                let raw = serde_json::to_value(spec)?;
                let action = match self.evaluator.renderer().render_value(&raw, environment) {
                    Ok(action) => action,
                    Err(AppError::Template(message)) => {
                        self.emit_render_failure(
                            execution.execution_id,
                            &step.step,
                            started,
                            &message,
                        )
                        .await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };

                let context = serde_json::Value::Object(
                    environment
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                );

                let mut job = QueueJobSpec::new(
                    execution.execution_id,
                    &step.step,
                    action,
                    context,
                    execution.catalog_id,
                );
                job.max_attempts = Some(self.config.max_attempts);

                let queue_id =
                    queue_queries::enqueue(&self.pool, &job, self.config.max_attempts).await?;

                tracing::info!(
                    execution_id = execution.execution_id,
                    step = %step.step,
                    queue_id,
                    kind = %spec.kind,
                    "Step dispatched"
                );
            }
            StepBody::Playbook(spec) => {
                let started = self
                    .emit_step_started(execution.execution_id, step, environment)
                    .await?;
                self.start_child_execution(execution, step, spec, environment, started)
                    .await?;
            }
        }

        Ok(())
    }

    /// Emit a step_started event with the variable environment attached.
    async fn emit_step_started(
        &self,
        execution_id: i64,
        step: &Step,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<i64> {
        let context = serde_json::Value::Object(
            environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let event = event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::StepStarted,
                &step.step,
                EventStatus::Started,
            )
            .with_context(context)
            .with_idempotency_key(format!("step_started:{}", step.step)),
        )
        .await?;

        Ok(event.event_id)
    }

    async fn emit_skipped(&self, execution_id: i64, step_name: &str) -> AppResult<()> {
        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::Skipped,
                step_name,
                EventStatus::Skipped,
            )
            .with_idempotency_key(format!("skipped:{}", step_name)),
        )
        .await?;

        tracing::debug!(execution_id, step = %step_name, "Step skipped");
        Ok(())
    }

    async fn emit_predicate_failure(
        &self,
        execution_id: i64,
        step_name: &str,
        message: &str,
    ) -> AppResult<()> {
        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::ActionFailed,
                step_name,
                EventStatus::Failed,
            )
            .with_payload(serde_json::json!({
                "error": message,
                "failure_kind": "predicate_error",
            }))
            .with_idempotency_key(format!("predicate_failed:{}", step_name)),
        )
        .await?;

        Ok(())
    }

    async fn emit_render_failure(
        &self,
        execution_id: i64,
        step_name: &str,
        parent_event_id: i64,
        message: &str,
    ) -> AppResult<()> {
        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution_id,
                EventType::ActionFailed,
                step_name,
                EventStatus::Failed,
            )
            .with_payload(serde_json::json!({
                "error": message,
                "failure_kind": "template_error",
            }))
            .with_parent(parent_event_id)
            .with_idempotency_key(format!("render_failed:{}", step_name)),
        )
        .await?;

        Ok(())
    }

    /// Start a child execution for a sub-playbook step.
    async fn start_child_execution(
        &self,
        execution: &Execution,
        step: &Step,
        spec: &SubPlaybookSpec,
        environment: &HashMap<String, serde_json::Value>,
        started_event_id: i64,
    ) -> AppResult<()> {
        // A child may already exist when a previous pass crashed between
        // creating it and observing it.
        if execution_queries::get_child_execution(&self.pool, execution.execution_id, &step.step)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let parameters = match &spec.payload {
            Some(payload) => {
                let rendered = self.evaluator.renderer().render_value(payload, environment)?;
                match rendered {
                    serde_json::Value::Object(map) => map.into_iter().collect(),
                    _ => HashMap::new(),
                }
            }
            None => HashMap::new(),
        };

        let catalog = catalog_queries::get_by_path_version(
            &self.pool,
            &spec.path,
            spec.version.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Playbook not found: {}", spec.path)))?;

        let playbook = parse_playbook(&catalog.content)?;
        let workload = playbook.merged_workload(&parameters);

        let child_id = execution_queries::next_id(&self.pool).await?;
        execution_queries::create_execution(
            &self.pool,
            child_id,
            catalog.catalog_id,
            &workload,
            Some(execution.execution_id),
            Some(&step.step),
            Some(started_event_id),
        )
        .await?;
        workload_queries::init(&self.pool, child_id, &workload).await?;

        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                child_id,
                EventType::ExecutionStart,
                &catalog.path,
                EventStatus::Started,
            )
            .with_payload(serde_json::json!({
                "path": catalog.path,
                "version": catalog.version,
                "catalog_id": catalog.catalog_id.to_string(),
                "parent_execution_id": execution.execution_id.to_string(),
                "parent_step": step.step,
                "parent_event_id": started_event_id.to_string(),
            }))
            .with_context(workload)
            .with_idempotency_key("execution_start"),
        )
        .await?;

        tracing::info!(
            execution_id = execution.execution_id,
            child_execution_id = child_id,
            step = %step.step,
            path = %spec.path,
            "Child execution started"
        );

        Ok(())
    }

    /// Turn a terminal child execution into this step's action event.
    async fn absorb_child_result(
        &self,
        execution: &Execution,
        step: &Step,
        spec: &SubPlaybookSpec,
    ) -> AppResult<()> {
        let Some(child) = execution_queries::get_child_execution(
            &self.pool,
            execution.execution_id,
            &step.step,
        )
        .await?
        else {
            return Ok(());
        };

        match ExecutionStatus::from(child.status.as_str()) {
            ExecutionStatus::Completed => {
                let result = self.child_result(&child, spec).await?;
                event_queries::append_event(
                    &self.pool,
                    &EventAppendRequest::new(
                        execution.execution_id,
                        EventType::ActionCompleted,
                        &step.step,
                        EventStatus::Completed,
                    )
                    .with_payload(serde_json::json!({
                        "result": result,
                        "child_execution_id": child.execution_id.to_string(),
                    }))
                    .with_idempotency_key(format!("child_completed:{}", step.step)),
                )
                .await?;
            }
            ExecutionStatus::Failed => {
                event_queries::append_event(
                    &self.pool,
                    &EventAppendRequest::new(
                        execution.execution_id,
                        EventType::ActionFailed,
                        &step.step,
                        EventStatus::Failed,
                    )
                    .with_payload(serde_json::json!({
                        "error": format!("Child execution {} failed", child.execution_id),
                        "failure_kind": "permanent",
                        "child_execution_id": child.execution_id.to_string(),
                    }))
                    .with_idempotency_key(format!("child_failed:{}", step.step)),
                )
                .await?;
            }
            ExecutionStatus::Cancelled => {
                event_queries::append_event(
                    &self.pool,
                    &EventAppendRequest::new(
                        execution.execution_id,
                        EventType::ActionFailed,
                        &step.step,
                        EventStatus::Failed,
                    )
                    .with_payload(serde_json::json!({
                        "error": format!("Child execution {} cancelled", child.execution_id),
                        "failure_kind": "cancelled",
                        "child_execution_id": child.execution_id.to_string(),
                    }))
                    .with_idempotency_key(format!("child_failed:{}", step.step)),
                )
                .await?;
            }
            _ => {}
        }

        Ok(())
    }

    /// The result a completed child hands back: one step's result when
    /// `return_step` selects it, the full result map otherwise.
    async fn child_result(
        &self,
        child: &Execution,
        spec: &SubPlaybookSpec,
    ) -> AppResult<serde_json::Value> {
        let completed = event_queries::get_latest_event_by_type(
            &self.pool,
            child.execution_id,
            EventType::ExecutionCompleted.as_str(),
        )
        .await?;

        let results = completed
            .and_then(|e| e.result().cloned())
            .unwrap_or(serde_json::Value::Null);

        Ok(match &spec.return_step {
            Some(return_step) => results
                .get(return_step)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            None => results,
        })
    }

    /// Persist `save` blocks of completed steps into the workload table.
    async fn apply_save_blocks(
        &self,
        execution: &Execution,
        playbook: &Playbook,
        snapshot: &ExecutionSnapshot,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<()> {
        for step in &playbook.workflow {
            let Some(save) = &step.save else { continue };
            if !snapshot.is_node_completed(&step.step) || snapshot.is_node_skipped(&step.step) {
                continue;
            }

            match self.evaluator.renderer().render_value(save, environment) {
                Ok(rendered) => {
                    workload_queries::merge(&self.pool, execution.execution_id, &rendered).await?;
                }
                Err(AppError::Template(message)) => {
                    // The save hook runs after the completion event; its
                    // failure is recorded on a synthesized node so the
                    // step's own state is untouched.
                    event_queries::append_event(
                        &self.pool,
                        &EventAppendRequest::new(
                            execution.execution_id,
                            EventType::ActionFailed,
                            format!("{}:save", step.step),
                            EventStatus::Failed,
                        )
                        .with_payload(serde_json::json!({
                            "error": message,
                            "failure_kind": "save_error",
                        }))
                        .with_idempotency_key(format!("save_failed:{}", step.step)),
                    )
                    .await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Detect terminal conditions. Returns the parent execution to notify
    /// when a terminal event was emitted.
    async fn detect_terminal(
        &self,
        execution: &Execution,
        playbook: &Playbook,
        snapshot: &ExecutionSnapshot,
    ) -> AppResult<Option<i64>> {
        // Failure: a failed step with no on_failure route around it.
        for step in &playbook.workflow {
            if snapshot.is_node_failed(&step.step) && step.on_failure.is_none() {
                let error = snapshot
                    .node(&step.step)
                    .and_then(|n| n.error.clone())
                    .unwrap_or_else(|| format!("Step '{}' failed", step.step));

                self.emit_execution_failed(execution, &error).await?;
                return Ok(execution.parent_execution_id);
            }
        }

        // Completion: every leaf is done and nothing is in flight.
        let leaves = playbook.leaf_steps();
        let all_leaves_done = !leaves.is_empty()
            && leaves.iter().all(|leaf| {
                self.step_is_complete(snapshot, leaf) || snapshot.is_node_skipped(&leaf.step)
            });
        let any_in_flight = playbook
            .workflow
            .iter()
            .any(|step| self.step_in_flight(snapshot, step));

        if all_leaves_done && !any_in_flight {
            let results = snapshot.all_results();
            event_queries::append_event(
                &self.pool,
                &EventAppendRequest::new(
                    execution.execution_id,
                    EventType::ExecutionCompleted,
                    "execution",
                    EventStatus::Completed,
                )
                .with_payload(serde_json::json!({"result": results}))
                .with_idempotency_key("execution_completed"),
            )
            .await?;

            execution_queries::set_terminal_status(
                &self.pool,
                execution.execution_id,
                ExecutionStatus::Completed.as_str(),
                chrono::Utc::now(),
            )
            .await?;

            tracing::info!(
                execution_id = execution.execution_id,
                "Execution completed"
            );
            return Ok(execution.parent_execution_id);
        }

        Ok(None)
    }

    async fn emit_execution_failed(&self, execution: &Execution, error: &str) -> AppResult<()> {
        event_queries::append_event(
            &self.pool,
            &EventAppendRequest::new(
                execution.execution_id,
                EventType::ExecutionFailed,
                "execution",
                EventStatus::Failed,
            )
            .with_payload(serde_json::json!({"error": error}))
            .with_idempotency_key("execution_failed"),
        )
        .await?;

        execution_queries::set_terminal_status(
            &self.pool,
            execution.execution_id,
            ExecutionStatus::Failed.as_str(),
            chrono::Utc::now(),
        )
        .await?;

        tracing::warn!(
            execution_id = execution.execution_id,
            error,
            "Execution failed"
        );
        Ok(())
    }

    /// Project the snapshot's terminal status onto the execution row.
    async fn sync_terminal_status(
        &self,
        execution: &Execution,
        snapshot: &ExecutionSnapshot,
    ) -> AppResult<()> {
        if snapshot.status.is_terminal()
            && execution.status != snapshot.status.as_str()
        {
            execution_queries::set_terminal_status(
                &self.pool,
                execution.execution_id,
                snapshot.status.as_str(),
                chrono::Utc::now(),
            )
            .await?;
        }
        Ok(())
    }

    /// Child executions that are still pending or running; they may need
    /// their first evaluation after being created in this pass.
    async fn children_pending_evaluation(&self, execution: &Execution) -> AppResult<Vec<i64>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT execution_id, status
            FROM noetl.execution
            WHERE parent_execution_id = $1
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(execution.execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }
}

/// Steps whose `next` or `on_failure` edges target the given step.
fn potential_parents<'a>(playbook: &'a Playbook, step_name: &str) -> Vec<&'a Step> {
    playbook
        .workflow
        .iter()
        .filter(|candidate| {
            let targets_next = match &candidate.next {
                Some(NextSpec::Single(target)) => target == step_name,
                Some(NextSpec::List(targets)) => targets.iter().any(|t| t == step_name),
                Some(NextSpec::Targets(targets)) => targets.iter().any(|t| t.step == step_name),
                None => false,
            };
            targets_next || candidate.on_failure.as_deref() == Some(step_name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branching_playbook() -> Playbook {
        parse_playbook(
            r#"
            metadata:
              name: branching
            workflow:
              - step: start
                next: check
              - step: check
                tool:
                  kind: http
                  url: "https://example.com"
                next:
                  - step: big_path
                    when: "check.result.x > 5"
                  - step: small_path
              - step: big_path
                tool:
                  kind: http
                  url: "https://example.com/big"
                next: end
              - step: small_path
                tool:
                  kind: http
                  url: "https://example.com/small"
                next: end
              - step: end
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_potential_parents() {
        let playbook = branching_playbook();

        let parents = potential_parents(&playbook, "end");
        let names: Vec<&str> = parents.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(names, vec!["big_path", "small_path"]);

        assert!(potential_parents(&playbook, "start").is_empty());

        let parents = potential_parents(&playbook, "check");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].step, "start");
    }

    #[test]
    fn test_potential_parents_includes_on_failure() {
        let playbook = parse_playbook(
            r#"
            metadata:
              name: failure_routing
            workflow:
              - step: start
                next: flaky
              - step: flaky
                tool:
                  kind: http
                  url: "https://example.com"
                on_failure: recover
                next: end
              - step: recover
                tool:
                  kind: shell
                  command: "echo recovering"
                next: end
              - step: end
            "#,
        )
        .unwrap();

        let parents = potential_parents(&playbook, "recover");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].step, "flaky");
    }

    #[test]
    fn test_start_request_deserialization_defaults() {
        let request: StartRequest =
            serde_json::from_str(r#"{"path": "workflows/etl"}"#).unwrap();
        assert_eq!(request.path.as_deref(), Some("workflows/etl"));
        assert!(request.catalog_id.is_none());
        assert!(request.parameters.is_empty());
        assert!(request.parent.is_none());
    }
}
