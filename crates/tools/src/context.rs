//! Execution context for tool invocations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Context passed to tools during execution.
///
/// Carries the rendered variable environment, resolved secrets, worker
/// identity, and the cancellation signal the executor must honor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Owning execution.
    pub execution_id: String,

    /// Node being executed (step name, or `step#index` for loop iterations).
    pub node_id: String,

    /// Queue row this invocation belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,

    /// Worker executing this context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    /// Lease attempt number for this job.
    #[serde(default)]
    pub attempt: i32,

    /// Variables available for template rendering.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    /// Resolved credential material. Never serialized.
    #[serde(default, skip_serializing)]
    pub secrets: HashMap<String, String>,

    /// Cancellation signal; cancelled on lease loss or execution cancel.
    #[serde(skip, default)]
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Set the worker identity.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Set the queue row identifier.
    pub fn with_queue_id(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    /// Set the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set a variable value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(name.into(), value);
    }

    /// Get a variable value.
    pub fn get_variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    /// Set a secret value.
    pub fn set_secret(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }

    /// Get a secret value.
    pub fn get_secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(|s| s.as_str())
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Flatten the context into a map for template rendering.
    pub fn to_template_context(&self) -> HashMap<String, serde_json::Value> {
        let mut ctx = self.variables.clone();
        ctx.insert(
            "execution_id".to_string(),
            serde_json::json!(self.execution_id),
        );
        ctx.insert("node_id".to_string(), serde_json::json!(self.node_id));
        if let Some(ref worker_id) = self.worker_id {
            ctx.insert("worker_id".to_string(), serde_json::json!(worker_id));
        }
        ctx
    }

    /// Merge another variable map into this context.
    pub fn merge_variables(&mut self, other: &HashMap<String, serde_json::Value>) {
        for (k, v) in other {
            self.variables.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_new() {
        let ctx = ExecutionContext::new("12345", "fetch_data");
        assert_eq!(ctx.execution_id, "12345");
        assert_eq!(ctx.node_id, "fetch_data");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_context_variables() {
        let mut ctx = ExecutionContext::default();
        ctx.set_variable("name", serde_json::json!("test"));
        assert_eq!(ctx.get_variable("name"), Some(&serde_json::json!("test")));
        assert_eq!(ctx.get_variable("missing"), None);
    }

    #[test]
    fn test_context_secrets_not_serialized() {
        let mut ctx = ExecutionContext::new("1", "step1");
        ctx.set_secret("api_key", "secret123");
        assert_eq!(ctx.get_secret("api_key"), Some("secret123"));

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(!json.contains("secret123"));
        assert!(!json.contains("secrets"));
    }

    #[test]
    fn test_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new("1", "step1").with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_context_to_template() {
        let mut ctx = ExecutionContext::new("12345", "step1").with_worker_id("worker-1");
        ctx.set_variable("input", serde_json::json!("value"));

        let template_ctx = ctx.to_template_context();
        assert_eq!(
            template_ctx.get("execution_id"),
            Some(&serde_json::json!("12345"))
        );
        assert_eq!(template_ctx.get("node_id"), Some(&serde_json::json!("step1")));
        assert_eq!(template_ctx.get("input"), Some(&serde_json::json!("value")));
    }
}
