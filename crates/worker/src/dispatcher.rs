//! Action dispatch for leased jobs.
//!
//! Each leased job runs as one task: a heartbeat side-task keeps the
//! lease alive, credentials are materialized, remaining templates are
//! rendered, and the matching executor runs under a cancellation token.
//! The terminal queue transition (`complete` / `fail`) is what writes the
//! job's terminal event on the server, after the lease check; a worker
//! that lost its lease therefore never produces a duplicate event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use noetl_tools::registry::{AuthConfig, ToolConfig};
use noetl_tools::template::{self, TemplateEngine};
use noetl_tools::tools::create_default_registry;
use noetl_tools::{ExecutionContext, ToolError, ToolRegistry};

use crate::client::{ClientError, LeasedJob, ReportedEvent, ServerClient};
use crate::config::WorkerConfig;

/// Dispatcher: translates leased jobs into executor calls.
pub struct Dispatcher {
    client: ServerClient,
    registry: ToolRegistry,
    template_engine: TemplateEngine,
    worker_id: String,
    heartbeat_interval: Duration,
    lease_duration_seconds: u64,
}

impl Dispatcher {
    /// Create a dispatcher with the default tool registry.
    pub fn new(client: ServerClient, config: &WorkerConfig, worker_id: String) -> Self {
        Self {
            client,
            registry: create_default_registry(),
            template_engine: TemplateEngine::new(),
            worker_id,
            heartbeat_interval: Duration::from_secs(config.effective_heartbeat_seconds()),
            lease_duration_seconds: config.lease_duration_seconds,
        }
    }

    /// Execute one leased job to completion, failure, or abandonment.
    pub async fn execute(self: Arc<Self>, job: LeasedJob) {
        let cancellation = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(&job, cancellation.clone());

        let outcome = self.run_job(&job, cancellation.clone()).await;

        heartbeat.abort();

        match outcome {
            Ok(()) => {}
            Err(ClientError::LeaseLost(queue_id)) => {
                // Normal outcome: the queue re-delivers elsewhere. Nothing
                // is emitted.
                tracing::warn!(
                    queue_id = %queue_id,
                    node_id = %job.node_id,
                    "Lease lost; abandoning in-flight work"
                );
            }
            Err(e) => {
                tracing::error!(
                    queue_id = %job.queue_id,
                    node_id = %job.node_id,
                    error = %e,
                    "Job dispatch failed; leaving lease to expire"
                );
            }
        }
    }

    /// The happy-path pipeline: report start, resolve credentials, render,
    /// execute, acknowledge.
    async fn run_job(
        &self,
        job: &LeasedJob,
        cancellation: CancellationToken,
    ) -> Result<(), ClientError> {
        let started = std::time::Instant::now();

        // Parse the action specification.
        let tool_config: ToolConfig = match serde_json::from_value(job.action.clone()) {
            Ok(config) => config,
            Err(e) => {
                return self
                    .fail_job(job, &format!("Invalid action specification: {}", e), "permanent")
                    .await;
            }
        };

        let mut ctx = ExecutionContext::new(&job.execution_id, &job.node_id)
            .with_worker_id(&self.worker_id)
            .with_queue_id(&job.queue_id)
            .with_cancellation(cancellation.clone());
        ctx.attempt = job.attempts;

        if let serde_json::Value::Object(map) = &job.context {
            ctx.variables = map.clone().into_iter().collect();
        }

        // Materialize credential references before execution.
        if let Some(auth) = &tool_config.auth {
            if let Err(message) = self.resolve_credentials(auth, &mut ctx).await {
                return self.fail_job(job, &message, "auth_error").await;
            }
        }

        self.report_action_started(job, &ctx).await?;

        // Render any template strings still unresolved in the action.
        let rendered = match self.render_config(&tool_config, &ctx) {
            Ok(config) => config,
            Err(e) => {
                return self.fail_job(job, &e.to_string(), "template_error").await;
            }
        };

        tracing::debug!(
            queue_id = %job.queue_id,
            node_id = %job.node_id,
            kind = %rendered.kind,
            attempt = job.attempts,
            "Executing action"
        );

        match self.registry.execute(&rendered, &ctx).await {
            Ok(result) if result.is_success() => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let payload = result.data.unwrap_or(serde_json::Value::Null);
                self.client
                    .complete(&job.queue_id, &self.worker_id, &payload, duration_ms)
                    .await?;

                tracing::info!(
                    queue_id = %job.queue_id,
                    node_id = %job.node_id,
                    duration_ms,
                    "Action completed"
                );
                Ok(())
            }
            Ok(result) => {
                // Executor-level error result: timeouts retry, the rest
                // are permanent data failures.
                let kind = match result.status {
                    noetl_tools::ToolStatus::Timeout => "timeout",
                    _ => "permanent",
                };
                let message = result
                    .error
                    .unwrap_or_else(|| "action reported failure".to_string());
                self.fail_job(job, &message, kind).await
            }
            Err(ToolError::Cancelled) => {
                // Cancellation comes from lease loss or shutdown; the
                // queue's reaper handles re-delivery.
                tracing::warn!(
                    queue_id = %job.queue_id,
                    node_id = %job.node_id,
                    "Action cancelled"
                );
                Ok(())
            }
            Err(e) => {
                let kind = e.failure_kind();
                self.fail_job(job, &e.to_string(), kind.as_str()).await
            }
        }
    }

    /// Report `action_started` for this attempt, attaching the variable
    /// environment with all secret material redacted.
    async fn report_action_started(
        &self,
        job: &LeasedJob,
        ctx: &ExecutionContext,
    ) -> Result<(), ClientError> {
        let secrets: Vec<&str> = ctx.secrets.values().map(|s| s.as_str()).collect();
        let context = template::redact(&job.context, &secrets);

        self.client
            .report_event_with_retry(
                &ReportedEvent {
                    execution_id: job.execution_id.clone(),
                    event_type: "action_started".to_string(),
                    node_id: job.node_id.clone(),
                    status: "started".to_string(),
                    payload: Some(serde_json::json!({"attempt": job.attempts})),
                    context: Some(context),
                    idempotency_key: Some(format!(
                        "action_started:{}:{}",
                        job.queue_id, job.attempts
                    )),
                    worker_id: Some(self.worker_id.clone()),
                    queue_id: Some(job.queue_id.clone()),
                },
                3,
            )
            .await
    }

    /// Resolve the auth block's credential reference into the context's
    /// secret map.
    async fn resolve_credentials(
        &self,
        auth: &AuthConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<(), String> {
        let Some(credential_name) = &auth.credential else {
            return Ok(());
        };

        let material = self
            .client
            .materialize_credential(credential_name)
            .await
            .map_err(|e| format!("Credential '{}' resolution failed: {}", credential_name, e))?;

        match material.get("data") {
            Some(serde_json::Value::Object(map)) => {
                // A structured payload contributes each field; the
                // credential's own name binds its conventional secret.
                for (key, value) in map {
                    if let Some(s) = value.as_str() {
                        ctx.set_secret(key.clone(), s.to_string());
                    }
                }
                if let Some(secret) = map
                    .get("token")
                    .or_else(|| map.get("password"))
                    .or_else(|| map.get("value"))
                    .and_then(|v| v.as_str())
                {
                    ctx.set_secret(credential_name.clone(), secret.to_string());
                }
                Ok(())
            }
            Some(serde_json::Value::String(secret)) => {
                ctx.set_secret(credential_name.clone(), secret.clone());
                Ok(())
            }
            _ => Err(format!(
                "Credential '{}' has no usable payload",
                credential_name
            )),
        }
    }

    /// Render remaining template strings in the action configuration.
    fn render_config(
        &self,
        config: &ToolConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolConfig, ToolError> {
        let variables: HashMap<String, serde_json::Value> = ctx.to_template_context();
        let rendered = self.template_engine.render_value(&config.config, &variables)?;

        Ok(ToolConfig {
            kind: config.kind.clone(),
            config: rendered,
            timeout: config.timeout,
            auth: config.auth.clone(),
        })
    }

    /// Report a failure to the queue. Transient and timeout kinds re-queue
    /// with backoff; the rest dead-letter.
    async fn fail_job(
        &self,
        job: &LeasedJob,
        error: &str,
        failure_kind: &str,
    ) -> Result<(), ClientError> {
        tracing::warn!(
            queue_id = %job.queue_id,
            node_id = %job.node_id,
            failure_kind,
            error,
            "Action failed"
        );

        self.client
            .fail(&job.queue_id, &self.worker_id, error, failure_kind)
            .await
    }

    /// Heartbeat the lease until the task finishes or the lease is lost,
    /// cancelling in-flight work on loss.
    fn spawn_heartbeat(
        &self,
        job: &LeasedJob,
        cancellation: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let queue_id = job.queue_id.clone();
        let worker_id = self.worker_id.clone();
        let interval = self.heartbeat_interval;
        let lease_duration = self.lease_duration_seconds;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                match client.heartbeat(&queue_id, &worker_id, lease_duration).await {
                    Ok(()) => {
                        tracing::trace!(queue_id = %queue_id, "Lease extended");
                    }
                    Err(ClientError::LeaseLost(_)) => {
                        tracing::warn!(
                            queue_id = %queue_id,
                            "Heartbeat rejected; cancelling in-flight work"
                        );
                        cancellation.cancel();
                        break;
                    }
                    Err(e) => {
                        // Transient transport failure: keep the task
                        // running and let the next beat try again.
                        tracing::warn!(queue_id = %queue_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dispatcher() -> Arc<Dispatcher> {
        let config = WorkerConfig::default();
        Arc::new(Dispatcher::new(
            ServerClient::new("http://localhost:8082"),
            &config,
            "worker-test".to_string(),
        ))
    }

    #[test]
    fn test_dispatcher_registers_default_tools() {
        let dispatcher = make_dispatcher();
        assert!(dispatcher.registry.has("http"));
        assert!(dispatcher.registry.has("shell"));
    }

    #[test]
    fn test_render_config_resolves_context_variables() {
        let dispatcher = make_dispatcher();

        let config = ToolConfig {
            kind: "shell".to_string(),
            config: serde_json::json!({"command": "echo {{ greeting }}"}),
            timeout: None,
            auth: None,
        };

        let mut ctx = ExecutionContext::new("1", "step1");
        ctx.set_variable("greeting", serde_json::json!("hello"));

        let rendered = dispatcher.render_config(&config, &ctx).unwrap();
        assert_eq!(rendered.config["command"], "echo hello");
    }

    #[test]
    fn test_failure_kind_mapping() {
        use noetl_tools::FailureKind;

        assert_eq!(FailureKind::Transient.as_str(), "transient");
        assert_eq!(
            ToolError::Auth("denied".to_string()).failure_kind(),
            FailureKind::AuthError
        );
    }
}
