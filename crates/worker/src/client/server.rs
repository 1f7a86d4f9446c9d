//! Typed client for the server's queue, runtime, event, and credential
//! endpoints.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server reports the lease is no longer held. A normal outcome:
    /// discard the in-flight work.
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    /// Transport failure; the caller may retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success response from the server.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// A job leased from the queue. IDs arrive as strings per the API
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasedJob {
    pub queue_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub action: serde_json::Value,
    pub context: serde_json::Value,
    pub catalog_id: String,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl LeasedJob {
    /// The loop iteration marker, if this job is one iteration of an
    /// iterator step.
    pub fn iteration_index(&self) -> Option<u64> {
        self.context.get("_iteration")?.get("index")?.as_u64()
    }
}

/// Event reported through the server's enrichment endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedEvent {
    pub execution_id: String,
    pub event_type: String,
    pub node_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
}

/// Server API client.
#[derive(Clone)]
pub struct ServerClient {
    client: reqwest::Client,
    server_url: String,
}

impl ServerClient {
    /// Create a new client for the given server base URL.
    pub fn new(server_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Register this worker's runtime.
    pub async fn register_runtime(
        &self,
        runtime_id: &str,
        pool_name: &str,
        capabilities: &[String],
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/api/runtime/register", self.server_url))
            .json(&serde_json::json!({
                "runtime_id": runtime_id,
                "pool_name": pool_name,
                "capabilities": capabilities,
            }))
            .send()
            .await?;

        Self::expect_success(response).await?;
        Ok(())
    }

    /// Send a runtime liveness heartbeat.
    pub async fn runtime_heartbeat(
        &self,
        runtime_id: &str,
        pool_name: &str,
        capabilities: &[String],
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/api/runtime/heartbeat", self.server_url))
            .json(&serde_json::json!({
                "runtime_id": runtime_id,
                "pool_name": pool_name,
                "capabilities": capabilities,
            }))
            .send()
            .await?;

        Self::expect_success(response).await?;
        Ok(())
    }

    /// Lease one job. Returns `None` when nothing is leasable.
    pub async fn lease(
        &self,
        worker_id: &str,
        pool: &str,
        capabilities: &[String],
        lease_duration_seconds: u64,
    ) -> Result<Option<LeasedJob>, ClientError> {
        let response = self
            .client
            .post(format!("{}/api/queue/lease", self.server_url))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "pool": pool,
                "capabilities": capabilities,
                "lease_duration_seconds": lease_duration_seconds,
            }))
            .send()
            .await?;

        let response = Self::expect_success(response).await?;
        let job: Option<LeasedJob> = response.json().await?;
        Ok(job)
    }

    /// Extend the lease on a job.
    pub async fn heartbeat(
        &self,
        queue_id: &str,
        worker_id: &str,
        lease_duration_seconds: u64,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!(
                "{}/api/queue/{}/heartbeat",
                self.server_url, queue_id
            ))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "lease_duration_seconds": lease_duration_seconds,
            }))
            .send()
            .await?;

        Self::check_lease(queue_id, response).await?;
        Ok(())
    }

    /// Report success with the result payload.
    pub async fn complete(
        &self,
        queue_id: &str,
        worker_id: &str,
        result: &serde_json::Value,
        duration_ms: i64,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!(
                "{}/api/queue/{}/complete",
                self.server_url, queue_id
            ))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "result": result,
                "duration_ms": duration_ms,
            }))
            .send()
            .await?;

        Self::check_lease(queue_id, response).await?;
        Ok(())
    }

    /// Report failure with its classification.
    pub async fn fail(
        &self,
        queue_id: &str,
        worker_id: &str,
        error: &str,
        failure_kind: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/api/queue/{}/fail", self.server_url, queue_id))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "error": error,
                "failure_kind": failure_kind,
            }))
            .send()
            .await?;

        Self::check_lease(queue_id, response).await?;
        Ok(())
    }

    /// Report an event through the server.
    pub async fn report_event(&self, event: &ReportedEvent) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/api/events", self.server_url))
            .json(event)
            .send()
            .await?;

        if response.status() == StatusCode::GONE {
            return Err(ClientError::LeaseLost(
                event.queue_id.clone().unwrap_or_default(),
            ));
        }
        Self::expect_success(response).await?;
        Ok(())
    }

    /// Report an event with bounded retry for transient transport errors.
    pub async fn report_event_with_retry(
        &self,
        event: &ReportedEvent,
        max_retries: u32,
    ) -> Result<(), ClientError> {
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=max_retries {
            match self.report_event(event).await {
                Ok(()) => return Ok(()),
                Err(ClientError::LeaseLost(id)) => return Err(ClientError::LeaseLost(id)),
                Err(e) if attempt < max_retries => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Event report failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(10));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Materialize a credential's decrypted payload.
    pub async fn materialize_credential(
        &self,
        name: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/credentials/{}/data", self.server_url, name))
            .send()
            .await?;

        let response = Self::expect_success(response).await?;
        Ok(response.json().await?)
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());

        Err(ClientError::Server {
            status: status.as_u16(),
            message,
        })
    }

    async fn check_lease(
        queue_id: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        if response.status() == StatusCode::GONE {
            return Err(ClientError::LeaseLost(queue_id.to_string()));
        }
        Self::expect_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leased_job_iteration_index() {
        let job = LeasedJob {
            queue_id: "1".to_string(),
            execution_id: "2".to_string(),
            node_id: "iter#1".to_string(),
            action: serde_json::json!({"kind": "http"}),
            context: serde_json::json!({"_iteration": {"step": "iter", "index": 1, "expected": 3}}),
            catalog_id: "3".to_string(),
            attempts: 1,
            max_attempts: 3,
        };
        assert_eq!(job.iteration_index(), Some(1));

        let plain = LeasedJob {
            context: serde_json::json!({}),
            ..job
        };
        assert_eq!(plain.iteration_index(), None);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ServerClient::new("http://localhost:8082/");
        assert_eq!(client.server_url, "http://localhost:8082");
    }
}
