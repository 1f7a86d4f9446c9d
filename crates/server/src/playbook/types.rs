//! Playbook tree types.
//!
//! A step shares a common header (`step`, `when`, `next`, `save`,
//! `on_failure`) and varies by body: a plain action (`tool`), an iterator
//! (`loop`), or a sub-playbook (`playbook`). Dispatch happens on
//! [`Step::body`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the entry step every workflow starts from.
pub const START_STEP: &str = "start";

/// A complete playbook definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// API version marker (e.g. "noetl.io/v1").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Document kind marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Playbook metadata.
    pub metadata: Metadata,

    /// Default workload, merged under the caller's parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<serde_json::Value>,

    /// The ordered step graph.
    pub workflow: Vec<Step>,
}

impl Playbook {
    /// Get a step by name.
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.workflow.iter().find(|s| s.step == name)
    }

    /// Steps with no outbound `next` edge.
    pub fn leaf_steps(&self) -> Vec<&Step> {
        self.workflow
            .iter()
            .filter(|s| s.next.is_none())
            .collect()
    }

    /// Merge the caller's parameters over the playbook's default workload.
    pub fn merged_workload(
        &self,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> serde_json::Value {
        let mut merged = match &self.workload {
            Some(serde_json::Value::Object(defaults)) => defaults.clone(),
            _ => serde_json::Map::new(),
        };
        for (k, v) in parameters {
            merged.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(merged)
    }
}

/// Playbook metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Playbook name.
    pub name: String,

    /// Catalog path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One node in the playbook graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name, unique within the workflow.
    pub step: String,

    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Enable guard: the step runs only when this predicate evaluates true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Iterator body.
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub r#loop: Option<IteratorSpec>,

    /// Sub-playbook body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<SubPlaybookSpec>,

    /// Plain action body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ActionSpec>,

    /// Mapping of workload keys persisted after the step completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save: Option<serde_json::Value>,

    /// Outbound edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextSpec>,

    /// Routed-on-failure edge, taken when this step exhausts its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

impl Step {
    /// The step's body as a tagged variant. Iterator and sub-playbook take
    /// precedence over a stray `tool` key.
    pub fn body(&self) -> StepBody<'_> {
        if let Some(spec) = &self.r#loop {
            StepBody::Iterator(spec)
        } else if let Some(spec) = &self.playbook {
            StepBody::Playbook(spec)
        } else if let Some(spec) = &self.tool {
            StepBody::Action(spec)
        } else {
            StepBody::None
        }
    }
}

/// The body variants a step dispatches on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepBody<'a> {
    /// Marker step with no work (start, end, join points).
    None,
    /// A typed action executed by a worker.
    Action(&'a ActionSpec),
    /// An iterator fanning out over a collection.
    Iterator(&'a IteratorSpec),
    /// A child execution of another playbook.
    Playbook(&'a SubPlaybookSpec),
}

/// A typed action specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action type tag (http, shell, ...). Selects the executor.
    pub kind: String,

    /// Action-specific configuration; rendered before dispatch.
    #[serde(flatten)]
    pub config: serde_json::Value,

    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Authentication configuration with credential references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
}

/// Iterator step configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorSpec {
    /// Template expression yielding the collection to iterate.
    pub collection: String,

    /// Variable name bound to the current element.
    #[serde(default = "default_element_name")]
    pub element: String,

    /// Variable name bound to the current index.
    #[serde(default = "default_index_name")]
    pub index: String,

    /// Dispatch mode.
    #[serde(default)]
    pub mode: IteratorMode,

    /// The inner action applied per element.
    pub tool: ActionSpec,

    /// Whether remaining iterations proceed after one fails.
    #[serde(default = "default_true")]
    pub continue_on_failure: bool,
}

fn default_element_name() -> String {
    "element".to_string()
}

fn default_index_name() -> String {
    "index".to_string()
}

fn default_true() -> bool {
    true
}

/// Iterator dispatch mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IteratorMode {
    /// All iterations dispatched immediately.
    #[default]
    Parallel,
    /// Iteration N+1 starts only after N completes.
    Sequential,
}

/// Sub-playbook step configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPlaybookSpec {
    /// Catalog path of the child playbook.
    pub path: String,

    /// Catalog version; latest when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Parameters passed as the child's workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Which child step's result becomes this step's result; the child's
    /// full result map when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_step: Option<String>,
}

/// Outbound edges of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    /// Single unconditional edge.
    Single(String),
    /// Multiple unconditional edges (parallel branches).
    List(Vec<String>),
    /// Conditional targets, evaluated in order.
    Targets(Vec<NextTarget>),
}

/// One conditional outbound edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextTarget {
    /// Target step name.
    pub step: String,

    /// Predicate gating this edge; an absent predicate always matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Extra variables bound for the target step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_playbook() -> Playbook {
        serde_yaml::from_str(
            r#"
            metadata:
              name: test
            workflow:
              - step: start
                next: fetch
              - step: fetch
                tool:
                  kind: http
                  url: "https://example.com"
                next: end
              - step: end
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_get_step() {
        let playbook = minimal_playbook();
        assert!(playbook.get_step("start").is_some());
        assert!(playbook.get_step("missing").is_none());
    }

    #[test]
    fn test_leaf_steps() {
        let playbook = minimal_playbook();
        let leaves = playbook.leaf_steps();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].step, "end");
    }

    #[test]
    fn test_step_body_dispatch() {
        let playbook = minimal_playbook();
        assert!(matches!(playbook.get_step("start").unwrap().body(), StepBody::None));
        match playbook.get_step("fetch").unwrap().body() {
            StepBody::Action(spec) => {
                assert_eq!(spec.kind, "http");
                assert_eq!(spec.config["url"], "https://example.com");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_iterator_step_parsing() {
        let step: Step = serde_yaml::from_str(
            r#"
            step: iter
            loop:
              collection: "{{ items }}"
              element: item
              mode: sequential
              tool:
                kind: shell
                command: "echo {{ item }}"
            next: end
            "#,
        )
        .unwrap();

        match step.body() {
            StepBody::Iterator(spec) => {
                assert_eq!(spec.element, "item");
                assert_eq!(spec.index, "index");
                assert_eq!(spec.mode, IteratorMode::Sequential);
                assert!(spec.continue_on_failure);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_next_spec_shapes() {
        let single: NextSpec = serde_yaml::from_str(r#""end""#).unwrap();
        assert_eq!(single, NextSpec::Single("end".to_string()));

        let list: NextSpec = serde_yaml::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(list, NextSpec::List(vec!["a".to_string(), "b".to_string()]));

        let targets: NextSpec = serde_yaml::from_str(
            r#"
            - step: big_path
              when: "x > 5"
            - step: small_path
            "#,
        )
        .unwrap();
        match targets {
            NextSpec::Targets(targets) => {
                assert_eq!(targets.len(), 2);
                assert_eq!(targets[0].when.as_deref(), Some("x > 5"));
                assert!(targets[1].when.is_none());
            }
            other => panic!("unexpected next: {:?}", other),
        }
    }

    #[test]
    fn test_merged_workload() {
        let playbook: Playbook = serde_yaml::from_str(
            r#"
            metadata:
              name: test
            workload:
              region: us-east
              retries: 2
            workflow:
              - step: start
            "#,
        )
        .unwrap();

        let mut params = HashMap::new();
        params.insert("retries".to_string(), serde_json::json!(5));

        let merged = playbook.merged_workload(&params);
        assert_eq!(merged["region"], "us-east");
        assert_eq!(merged["retries"], 5);
    }
}
