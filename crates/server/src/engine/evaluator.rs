//! Predicate and transition evaluation.
//!
//! Evaluates step `when` guards and `next` edge conditions against the
//! execution's variable environment, and resolves iterator collections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::playbook::{NextSpec, Step};
use crate::template::TemplateRenderer;

/// A resolved outbound edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDecision {
    /// Target step name.
    pub target: String,

    /// The `when` outcome that selected this edge.
    pub when_result: bool,

    /// Which branch this edge represents: "then" for a matched conditional
    /// or unconditional edge, "else" for a fallback target.
    pub branch: String,

    /// Extra variables bound for the target step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

/// Targets of conditional edges that did not match; they receive `skipped`
/// events so downstream joins can settle.
#[derive(Debug, Clone, Default)]
pub struct NextEvaluation {
    /// Edges to follow.
    pub decisions: Vec<TransitionDecision>,
    /// Conditional targets passed over by the taken branch.
    pub not_taken: Vec<String>,
}

/// Condition evaluator for workflow transitions.
pub struct ConditionEvaluator {
    renderer: TemplateRenderer,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self {
            renderer: TemplateRenderer::new(),
        }
    }

    /// Evaluate a predicate expression.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<bool> {
        self.renderer.evaluate_condition(condition, environment)
    }

    /// Evaluate a step's enable guard. A step without a guard always runs.
    pub fn evaluate_step_when(
        &self,
        step: &Step,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<bool> {
        match &step.when {
            Some(when_expr) => self.evaluate_condition(when_expr, environment),
            None => Ok(true),
        }
    }

    /// Evaluate a step's outbound edges against the environment.
    ///
    /// Conditional target lists are exclusive: the first matching edge wins
    /// and the remaining targets are reported as not taken. Plain and list
    /// edges are unconditional.
    pub fn evaluate_next(
        &self,
        step: &Step,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<NextEvaluation> {
        let mut evaluation = NextEvaluation::default();

        match &step.next {
            Some(NextSpec::Single(target)) => {
                evaluation.decisions.push(TransitionDecision {
                    target: target.clone(),
                    when_result: true,
                    branch: "then".to_string(),
                    args: None,
                });
            }
            Some(NextSpec::List(targets)) => {
                for target in targets {
                    evaluation.decisions.push(TransitionDecision {
                        target: target.clone(),
                        when_result: true,
                        branch: "then".to_string(),
                        args: None,
                    });
                }
            }
            Some(NextSpec::Targets(targets)) => {
                let mut matched = false;
                for target in targets {
                    if matched {
                        evaluation.not_taken.push(target.step.clone());
                        continue;
                    }

                    let (when_result, branch) = match &target.when {
                        Some(when_expr) => {
                            (self.evaluate_condition(when_expr, environment)?, "then")
                        }
                        // An unconditional trailing target is the else branch.
                        None => (true, "else"),
                    };

                    if when_result {
                        matched = true;
                        evaluation.decisions.push(TransitionDecision {
                            target: target.step.clone(),
                            when_result: true,
                            branch: branch.to_string(),
                            args: target.args.clone(),
                        });
                    } else {
                        evaluation.not_taken.push(target.step.clone());
                    }
                }
            }
            None => {}
        }

        Ok(evaluation)
    }

    /// Evaluate an iterator's collection expression into an ordered list.
    ///
    /// A scalar renders as a singleton; an object becomes key/value pairs;
    /// a number N becomes the range `0..N`.
    pub fn evaluate_collection(
        &self,
        collection_expr: &str,
        environment: &HashMap<String, serde_json::Value>,
    ) -> AppResult<Vec<serde_json::Value>> {
        let value = self.renderer.render_to_value(collection_expr, environment)?;

        match value {
            serde_json::Value::Array(arr) => Ok(arr),
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| serde_json::json!({"key": k, "value": v}))
                .collect()),
            serde_json::Value::Number(n) => {
                let n = n.as_u64().unwrap_or(0) as usize;
                Ok((0..n).map(|i| serde_json::json!(i)).collect())
            }
            serde_json::Value::Null => Ok(vec![]),
            serde_json::Value::String(s) if s.trim().is_empty() => Ok(vec![]),
            scalar => Ok(vec![scalar]),
        }
    }

    /// Access to the underlying renderer for input rendering.
    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::parse_playbook;

    fn environment(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn branching_step() -> Step {
        let playbook = parse_playbook(
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
                next: end
              - step: small_path
                next: end
              - step: end
            "#,
        )
        .unwrap();
        playbook.get_step("check").unwrap().clone()
    }

    #[test]
    fn test_single_next() {
        let evaluator = ConditionEvaluator::new();
        let step: Step = serde_yaml::from_str("{step: a, next: b}").unwrap();

        let eval = evaluator.evaluate_next(&step, &HashMap::new()).unwrap();
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].target, "b");
        assert!(eval.not_taken.is_empty());
    }

    #[test]
    fn test_list_next_fans_out() {
        let evaluator = ConditionEvaluator::new();
        let step: Step = serde_yaml::from_str("{step: a, next: [b, c]}").unwrap();

        let eval = evaluator.evaluate_next(&step, &HashMap::new()).unwrap();
        let targets: Vec<&str> = eval.decisions.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["b", "c"]);
    }

    #[test]
    fn test_conditional_then_branch() {
        let evaluator = ConditionEvaluator::new();
        let step = branching_step();
        let env = environment(&[("check", serde_json::json!({"result": {"x": 7}}))]);

        let eval = evaluator.evaluate_next(&step, &env).unwrap();
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].target, "big_path");
        assert_eq!(eval.decisions[0].branch, "then");
        assert_eq!(eval.not_taken, vec!["small_path"]);
    }

    #[test]
    fn test_conditional_else_branch() {
        let evaluator = ConditionEvaluator::new();
        let step = branching_step();
        let env = environment(&[("check", serde_json::json!({"result": {"x": 2}}))]);

        let eval = evaluator.evaluate_next(&step, &env).unwrap();
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].target, "small_path");
        assert_eq!(eval.decisions[0].branch, "else");
        assert_eq!(eval.not_taken, vec!["big_path"]);
    }

    #[test]
    fn test_undefined_predicate_reference_errors() {
        let evaluator = ConditionEvaluator::new();
        let step = branching_step();

        let result = evaluator.evaluate_next(&step, &HashMap::new());
        assert!(matches!(result, Err(AppError::Template(_))));
    }

    #[test]
    fn test_step_when_guard() {
        let evaluator = ConditionEvaluator::new();
        let step: Step =
            serde_yaml::from_str("{step: a, when: \"count > 3\", next: b}").unwrap();

        let env = environment(&[("count", serde_json::json!(5))]);
        assert!(evaluator.evaluate_step_when(&step, &env).unwrap());

        let env = environment(&[("count", serde_json::json!(1))]);
        assert!(!evaluator.evaluate_step_when(&step, &env).unwrap());
    }

    #[test]
    fn test_collection_array() {
        let evaluator = ConditionEvaluator::new();
        let env = environment(&[("items", serde_json::json!([10, 20, 30]))]);

        let collection = evaluator.evaluate_collection("{{ items }}", &env).unwrap();
        assert_eq!(collection, vec![serde_json::json!(10), serde_json::json!(20), serde_json::json!(30)]);
    }

    #[test]
    fn test_collection_number_becomes_range() {
        let evaluator = ConditionEvaluator::new();
        let env = environment(&[("count", serde_json::json!(3))]);

        let collection = evaluator.evaluate_collection("{{ count }}", &env).unwrap();
        assert_eq!(collection.len(), 3);
        assert_eq!(collection[0], serde_json::json!(0));
    }

    #[test]
    fn test_collection_scalar_wraps_singleton() {
        let evaluator = ConditionEvaluator::new();
        let env = environment(&[("name", serde_json::json!("only"))]);

        let collection = evaluator.evaluate_collection("{{ name }}", &env).unwrap();
        assert_eq!(collection, vec![serde_json::json!("only")]);
    }

    #[test]
    fn test_collection_empty() {
        let evaluator = ConditionEvaluator::new();
        let env = environment(&[("items", serde_json::json!([]))]);

        let collection = evaluator.evaluate_collection("{{ items }}", &env).unwrap();
        assert!(collection.is_empty());
    }
}
