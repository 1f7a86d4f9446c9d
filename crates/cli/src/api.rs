//! Server API client for the CLI.

use std::collections::HashMap;

use anyhow::{bail, Result};

/// Thin API client; every method wraps one endpoint.
pub struct ApiClient {
    client: reqwest::Client,
    server_url: String,
}

impl ApiClient {
    /// Create a client for the given server base URL.
    pub fn new(server_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// POST /api/executions/run
    pub async fn run(
        &self,
        path: &str,
        version: Option<&str>,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let mut body = serde_json::json!({
            "path": path,
            "parameters": parameters,
        });
        if let Some(version) = version {
            body["version"] = serde_json::json!(version);
        }

        self.post("/api/executions/run", &body).await
    }

    /// GET /api/executions/{id}
    pub async fn execution(&self, execution_id: &str) -> Result<serde_json::Value> {
        self.get(&format!("/api/executions/{}", execution_id)).await
    }

    /// GET /api/executions/{id}/events
    pub async fn events(&self, execution_id: &str, since: i64) -> Result<serde_json::Value> {
        self.get(&format!(
            "/api/executions/{}/events?since_event_id={}",
            execution_id, since
        ))
        .await
    }

    /// POST /api/executions/{id}/cancel
    pub async fn cancel(&self, execution_id: &str, reason: &str) -> Result<serde_json::Value> {
        self.post(
            &format!("/api/executions/{}/cancel", execution_id),
            &serde_json::json!({"reason": reason}),
        )
        .await
    }

    /// POST /api/queue/reap-expired
    pub async fn reap_expired(&self) -> Result<serde_json::Value> {
        self.post("/api/queue/reap-expired", &serde_json::json!({}))
            .await
    }

    /// POST /api/catalog/register
    pub async fn register_playbook(
        &self,
        path: &str,
        version: &str,
        content: &str,
    ) -> Result<serde_json::Value> {
        self.post(
            "/api/catalog/register",
            &serde_json::json!({
                "path": path,
                "version": version,
                "content": content,
            }),
        )
        .await
    }

    /// GET /api/catalog/resource
    pub async fn get_playbook(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut url = format!("/api/catalog/resource?path={}", path);
        if let Some(version) = version {
            url.push_str(&format!("&version={}", version));
        }
        self.get(&url).await
    }

    /// GET /api/catalog
    pub async fn list_playbooks(&self) -> Result<serde_json::Value> {
        self.get("/api/catalog").await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}{}", self.server_url, path))
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.server_url, path))
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    /// Convert a response to JSON, surfacing the server's `error` field as
    /// the failure message.
    async fn into_json(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or(status.as_str());
            bail!("{}", message);
        }

        Ok(body)
    }
}
