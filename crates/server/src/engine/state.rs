//! Execution state reconstruction from events.
//!
//! The snapshot is a pure fold over the event log: folding the log from
//! scratch always produces the same state as incremental observation, which
//! is what makes crash recovery "re-fold the events".

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::db::models::{Event, EventStatus, EventType, ExecutionStatus};

/// The latest observation for one node (step, loop iteration, or
/// synthesized node).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: String,

    /// Event type of the node's most recent event.
    pub latest_type: EventType,

    /// Status of the node's most recent event.
    pub latest_status: String,

    /// Event id of the node's most recent event.
    pub latest_event_id: i64,

    /// Event id of the node's `step_started` event, if seen.
    pub started_event_id: Option<i64>,

    /// Payload of the node's `step_started` event, if seen. Iterator steps
    /// record their expected count and elements here.
    pub started_payload: Option<serde_json::Value>,

    /// `payload.result` of the node's most recent completion event.
    pub result: Option<serde_json::Value>,

    /// Error message of the node's most recent failure event.
    pub error: Option<String>,
}

impl NodeState {
    fn new(node_id: &str, latest_type: EventType, event: &Event) -> Self {
        Self {
            node_id: node_id.to_string(),
            latest_type,
            latest_status: event.status.clone(),
            latest_event_id: event.event_id,
            started_event_id: None,
            started_payload: None,
            result: None,
            error: None,
        }
    }
}

/// Execution state reconstructed by folding the event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: i64,

    /// Derived execution status; `Running` until a terminal event lands.
    pub status: ExecutionStatus,

    /// Latest observation per node.
    pub nodes: HashMap<String, NodeState>,

    /// Transition edges taken so far, as `(from, to)` pairs.
    pub transitions: HashSet<(String, String)>,

    /// Highest event id folded in.
    pub last_event_id: i64,

    /// Total number of events folded.
    pub event_count: usize,
}

impl ExecutionSnapshot {
    /// Fold a full event log into a snapshot. Events must be ordered by
    /// `event_id`, as returned by the event log fetch.
    pub fn from_events(execution_id: i64, events: &[Event]) -> Self {
        let mut snapshot = Self {
            execution_id,
            ..Default::default()
        };
        for event in events {
            snapshot.apply_event(event);
        }
        snapshot
    }

    /// Apply a single event.
    pub fn apply_event(&mut self, event: &Event) {
        debug_assert!(
            event.event_id > self.last_event_id,
            "events must be applied in order"
        );
        self.last_event_id = event.event_id;
        self.event_count += 1;

        let Some(event_type) = event.event_type() else {
            return;
        };

        match event_type {
            EventType::ExecutionStart => {
                self.status = ExecutionStatus::Running;
            }
            EventType::ExecutionCompleted => {
                self.status = ExecutionStatus::Completed;
            }
            EventType::ExecutionFailed => {
                self.status = ExecutionStatus::Failed;
            }
            EventType::ExecutionCancelled => {
                self.status = ExecutionStatus::Cancelled;
            }
            EventType::Transition => {
                if let Some(payload) = &event.payload {
                    let from = payload.get("from").and_then(|v| v.as_str());
                    let to = payload.get("to").and_then(|v| v.as_str());
                    if let (Some(from), Some(to)) = (from, to) {
                        self.transitions.insert((from.to_string(), to.to_string()));
                    }
                }
            }
            EventType::StepStarted => {
                let node = self.node_entry(&event.node_id, event_type, event);
                node.latest_type = EventType::StepStarted;
                node.latest_status = event.status.clone();
                node.latest_event_id = event.event_id;
                node.started_event_id = Some(event.event_id);
                node.started_payload = event.payload.clone();
            }
            EventType::ActionStarted
            | EventType::ActionCompleted
            | EventType::ActionFailed
            | EventType::LoopIteration
            | EventType::LoopAggregated
            | EventType::Skipped => {
                let result = event.result().cloned();
                let error = event
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("error"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                let node = self.node_entry(&event.node_id, event_type.clone(), event);
                node.latest_type = event_type;
                node.latest_status = event.status.clone();
                node.latest_event_id = event.event_id;
                if result.is_some() {
                    node.result = result;
                }
                if error.is_some() {
                    node.error = error;
                }
            }
        }
    }

    fn node_entry(
        &mut self,
        node_id: &str,
        event_type: EventType,
        event: &Event,
    ) -> &mut NodeState {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeState::new(node_id, event_type, event))
    }

    /// The node state for a step or synthesized node.
    pub fn node(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    /// The latest event type for a node.
    pub fn latest_type(&self, node_id: &str) -> Option<&EventType> {
        self.nodes.get(node_id).map(|n| &n.latest_type)
    }

    /// Whether the node has any event at all.
    pub fn is_started(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Whether the node's latest event marks it completed for dependency
    /// purposes: `action_completed`, `loop_aggregated`, or `skipped`.
    pub fn is_node_completed(&self, node_id: &str) -> bool {
        matches!(
            self.latest_type(node_id),
            Some(EventType::ActionCompleted)
                | Some(EventType::LoopAggregated)
                | Some(EventType::Skipped)
        )
    }

    /// Whether the node's latest event is a terminal failure.
    ///
    /// An `action_failed` with `in_progress` status records one retryable
    /// attempt failure and is not terminal; the queue will re-deliver.
    pub fn is_node_failed(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|n| {
                n.latest_type == EventType::ActionFailed
                    && n.latest_status == EventStatus::Failed.as_str()
            })
            .unwrap_or(false)
    }

    /// Whether the node was skipped.
    pub fn is_node_skipped(&self, node_id: &str) -> bool {
        matches!(self.latest_type(node_id), Some(EventType::Skipped))
    }

    /// Whether a transition `(from, to)` has been taken.
    pub fn transition_taken(&self, from: &str, to: &str) -> bool {
        self.transitions
            .contains(&(from.to_string(), to.to_string()))
    }

    /// Whether any taken transition targets the node.
    pub fn has_inbound_transition(&self, to: &str) -> bool {
        self.transitions.iter().any(|(_, t)| t == to)
    }

    /// The result of a node's latest completion event.
    pub fn node_result(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.nodes.get(node_id).and_then(|n| n.result.as_ref())
    }

    /// All completed node results keyed by node id.
    pub fn all_results(&self) -> HashMap<String, serde_json::Value> {
        self.nodes
            .iter()
            .filter(|(_, n)| {
                matches!(
                    n.latest_type,
                    EventType::ActionCompleted | EventType::LoopAggregated
                )
            })
            .filter_map(|(id, n)| n.result.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    /// Build the template environment: workload keys at top level, a
    /// `workload` namespace, `{step}.result` / `{step}.data` bindings for
    /// completed steps, and execution metadata.
    pub fn build_environment(
        &self,
        workload: &serde_json::Value,
    ) -> HashMap<String, serde_json::Value> {
        let mut env = HashMap::new();

        if let serde_json::Value::Object(map) = workload {
            for (k, v) in map {
                env.insert(k.clone(), v.clone());
            }
        }
        env.insert("workload".to_string(), workload.clone());

        for (node_id, node) in &self.nodes {
            // Iteration and synthesized nodes are not template names.
            if node_id.contains('#') || node_id.contains(':') {
                continue;
            }
            if let Some(result) = &node.result {
                env.insert(
                    node_id.clone(),
                    serde_json::json!({"result": result, "data": result}),
                );
            }
        }

        env.insert(
            "execution_id".to_string(),
            serde_json::json!(self.execution_id.to_string()),
        );

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event(
        event_id: i64,
        event_type: &str,
        node_id: &str,
        status: &str,
        payload: Option<serde_json::Value>,
    ) -> Event {
        Event {
            execution_id: 1,
            event_id,
            event_type: event_type.to_string(),
            node_id: node_id.to_string(),
            parent_event_id: None,
            status: status.to_string(),
            payload,
            context: None,
            trace_id: None,
            parent_span_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = ExecutionSnapshot::from_events(1, &[]);
        assert_eq!(snapshot.status, ExecutionStatus::Pending);
        assert_eq!(snapshot.event_count, 0);
    }

    #[test]
    fn test_fold_simple_run() {
        let events = vec![
            make_event(1, "execution_start", "single_http", "started", None),
            make_event(2, "step_started", "start", "started", None),
            make_event(
                3,
                "transition",
                "start",
                "completed",
                Some(serde_json::json!({"from": "start", "to": "fetch", "when_result": true})),
            ),
            make_event(4, "step_started", "fetch", "started", None),
            make_event(5, "action_started", "fetch", "started", None),
            make_event(
                6,
                "action_completed",
                "fetch",
                "completed",
                Some(serde_json::json!({"result": {"status": 200}, "duration_ms": 12})),
            ),
        ];

        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert!(snapshot.is_node_completed("fetch"));
        assert!(!snapshot.is_node_completed("start"));
        assert!(snapshot.transition_taken("start", "fetch"));
        assert!(snapshot.has_inbound_transition("fetch"));
        assert_eq!(
            snapshot.node_result("fetch"),
            Some(&serde_json::json!({"status": 200}))
        );
        assert_eq!(snapshot.last_event_id, 6);
    }

    #[test]
    fn test_fold_terminal_states() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "execution_completed", "p", "completed", None),
        ];
        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert_eq!(snapshot.status, ExecutionStatus::Completed);

        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "execution_cancelled", "p", "cancelled", None),
        ];
        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn test_fold_failure_keeps_error() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "step_started", "flaky", "started", None),
            make_event(
                3,
                "action_failed",
                "flaky",
                "failed",
                Some(serde_json::json!({
                    "error": "connection refused",
                    "failure_kind": "retry_exhausted",
                    "attempts": 3
                })),
            ),
        ];

        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert!(snapshot.is_node_failed("flaky"));
        assert_eq!(
            snapshot.node("flaky").unwrap().error.as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn test_retryable_attempt_failure_is_not_terminal() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "step_started", "flaky", "started", None),
            make_event(
                3,
                "action_failed",
                "flaky",
                "in_progress",
                Some(serde_json::json!({
                    "error": "connection refused",
                    "failure_kind": "transient",
                    "attempts": 1
                })),
            ),
        ];

        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert!(!snapshot.is_node_failed("flaky"));
        assert!(!snapshot.is_node_completed("flaky"));
    }

    #[test]
    fn test_skipped_counts_as_completed() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "skipped", "small_path", "skipped", None),
        ];

        let snapshot = ExecutionSnapshot::from_events(1, &events);
        assert!(snapshot.is_node_completed("small_path"));
        assert!(snapshot.is_node_skipped("small_path"));
    }

    #[test]
    fn test_started_payload_preserved_across_updates() {
        let events = vec![
            make_event(
                1,
                "step_started",
                "iter",
                "started",
                Some(serde_json::json!({"expected": 3, "elements": [10, 20, 30]})),
            ),
            make_event(
                2,
                "loop_iteration",
                "iter#0",
                "completed",
                Some(serde_json::json!({"index": 0, "result": 11, "status": "completed"})),
            ),
        ];

        let snapshot = ExecutionSnapshot::from_events(1, &events);
        let node = snapshot.node("iter").unwrap();
        assert_eq!(node.started_payload.as_ref().unwrap()["expected"], 3);
        assert!(snapshot.node("iter#0").is_some());
    }

    #[test]
    fn test_build_environment() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "step_started", "check", "started", None),
            make_event(
                3,
                "action_completed",
                "check",
                "completed",
                Some(serde_json::json!({"result": {"x": 7}})),
            ),
        ];

        let snapshot = ExecutionSnapshot::from_events(42, &events);
        let env = snapshot.build_environment(&serde_json::json!({"region": "us-east"}));

        assert_eq!(env["region"], serde_json::json!("us-east"));
        assert_eq!(env["workload"]["region"], serde_json::json!("us-east"));
        assert_eq!(env["check"]["result"]["x"], serde_json::json!(7));
        assert_eq!(env["check"]["data"]["x"], serde_json::json!(7));
        assert_eq!(env["execution_id"], serde_json::json!("42"));
    }

    #[test]
    fn test_refold_equals_incremental() {
        let events = vec![
            make_event(1, "execution_start", "p", "started", None),
            make_event(2, "step_started", "a", "started", None),
            make_event(
                3,
                "action_completed",
                "a",
                "completed",
                Some(serde_json::json!({"result": 1})),
            ),
            make_event(
                4,
                "transition",
                "a",
                "completed",
                Some(serde_json::json!({"from": "a", "to": "b"})),
            ),
            make_event(5, "step_started", "b", "started", None),
        ];

        let from_scratch = ExecutionSnapshot::from_events(1, &events);

        let mut incremental = ExecutionSnapshot::from_events(1, &events[..2]);
        for event in &events[2..] {
            incremental.apply_event(event);
        }

        assert_eq!(from_scratch.status, incremental.status);
        assert_eq!(from_scratch.last_event_id, incremental.last_event_id);
        assert_eq!(from_scratch.transitions, incremental.transitions);
        assert_eq!(
            from_scratch.nodes.keys().collect::<HashSet<_>>(),
            incremental.nodes.keys().collect::<HashSet<_>>()
        );
    }
}
