//! Playbook document parsing and validation.

use std::collections::HashSet;

use crate::error::{AppError, AppResult};
use crate::playbook::types::{NextSpec, Playbook, START_STEP};

/// Parse a playbook from catalog content (YAML, which also covers JSON)
/// and validate its step graph.
pub fn parse_playbook(content: &str) -> AppResult<Playbook> {
    let playbook: Playbook = serde_yaml::from_str(content)
        .map_err(|e| AppError::Parse(format!("Invalid playbook document: {}", e)))?;

    validate(&playbook)?;
    Ok(playbook)
}

/// Structural validation: unique step names, a start step, and next/
/// on_failure edges that point at existing steps. Cycles are permitted;
/// the broker walks by event causality, not graph topology.
fn validate(playbook: &Playbook) -> AppResult<()> {
    if playbook.workflow.is_empty() {
        return Err(AppError::Validation(
            "Playbook has no workflow steps".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for step in &playbook.workflow {
        if !names.insert(step.step.as_str()) {
            return Err(AppError::Validation(format!(
                "Duplicate step name: {}",
                step.step
            )));
        }
    }

    if !names.contains(START_STEP) {
        return Err(AppError::Validation(format!(
            "Playbook has no '{}' step",
            START_STEP
        )));
    }

    for step in &playbook.workflow {
        let mut targets: Vec<&str> = Vec::new();
        match &step.next {
            Some(NextSpec::Single(target)) => targets.push(target),
            Some(NextSpec::List(list)) => targets.extend(list.iter().map(|s| s.as_str())),
            Some(NextSpec::Targets(conditional)) => {
                targets.extend(conditional.iter().map(|t| t.step.as_str()))
            }
            None => {}
        }
        if let Some(on_failure) = &step.on_failure {
            targets.push(on_failure);
        }

        for target in targets {
            if !names.contains(target) {
                return Err(AppError::Validation(format!(
                    "Step '{}' routes to unknown step '{}'",
                    step.step, target
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_playbook() {
        let playbook = parse_playbook(
            r#"
            metadata:
              name: single_http
            workflow:
              - step: start
                next: fetch_url
              - step: fetch_url
                tool:
                  kind: http
                  url: "{{ workload.url }}"
                next: end
              - step: end
            "#,
        )
        .unwrap();

        assert_eq!(playbook.metadata.name, "single_http");
        assert_eq!(playbook.workflow.len(), 3);
    }

    #[test]
    fn test_parse_rejects_missing_start() {
        let result = parse_playbook(
            r#"
            metadata:
              name: bad
            workflow:
              - step: only_step
            "#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_duplicate_steps() {
        let result = parse_playbook(
            r#"
            metadata:
              name: bad
            workflow:
              - step: start
              - step: start
            "#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_next_target() {
        let result = parse_playbook(
            r#"
            metadata:
              name: bad
            workflow:
              - step: start
                next: nowhere
            "#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_allows_cycles() {
        let playbook = parse_playbook(
            r#"
            metadata:
              name: retry_loop
            workflow:
              - step: start
                next: attempt
              - step: attempt
                tool:
                  kind: http
                  url: "https://example.com"
                next:
                  - step: end
                    when: "attempt.result.status == 200"
                  - step: attempt
              - step: end
            "#,
        )
        .unwrap();
        assert!(playbook.get_step("attempt").is_some());
    }

    #[test]
    fn test_parse_validates_on_failure_edge() {
        let result = parse_playbook(
            r#"
            metadata:
              name: bad
            workflow:
              - step: start
                on_failure: missing_handler
            "#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
