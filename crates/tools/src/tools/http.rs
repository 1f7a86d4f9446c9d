//! HTTP request tool.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::auth::AuthResolver;
use crate::context::ExecutionContext;
use crate::error::{FailureKind, ToolError};
use crate::registry::{Tool, ToolConfig};
use crate::result::ToolResult;

/// HTTP method.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)] // HTTP methods are conventionally uppercase
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::DELETE => Method::DELETE,
            HttpMethod::HEAD => Method::HEAD,
            HttpMethod::OPTIONS => Method::OPTIONS,
        }
    }
}

/// HTTP tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// URL to request.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: HttpMethod,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body (for POST/PUT/PATCH).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,

    /// Raw string body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Query parameters.
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// HTTP request tool.
///
/// Response status classes map onto the failure taxonomy: 2xx succeeds,
/// 5xx and 429 fail transient (retried by the queue), other 4xx fail
/// permanent.
pub struct HttpTool {
    client: reqwest::Client,
    auth_resolver: AuthResolver,
}

impl HttpTool {
    /// Create a new HTTP tool.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            auth_resolver: AuthResolver::new(),
        }
    }

    /// Create an HTTP tool with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            auth_resolver: AuthResolver::new(),
        }
    }

    async fn request(
        &self,
        config: &HttpConfig,
        tool_config: &ToolConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let start = std::time::Instant::now();

        let method: Method = config.method.clone().into();
        let mut request = self.client.request(method, &config.url);

        if !config.params.is_empty() {
            request = request.query(&config.params);
        }

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(ref json) = config.json {
            request = request.json(json);
        } else if let Some(ref body) = config.body {
            request = request.body(body.clone());
        }

        if let Some(ref auth) = tool_config.auth {
            let creds = self.auth_resolver.resolve(auth, ctx)?;
            request = creds.apply_to_request(request);
        }

        let timeout_secs = config.timeout_seconds.or(tool_config.timeout);
        if let Some(timeout) = timeout_secs {
            request = request.timeout(Duration::from_secs(timeout));
        }

        let response = tokio::select! {
            resp = request.send() => resp?,
            _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled),
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let text = response.text().await.unwrap_or_default();
        let body: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        let duration_ms = start.elapsed().as_millis() as u64;

        if status.is_success() {
            Ok(ToolResult::success(serde_json::json!({
                "status": status.as_u16(),
                "headers": headers,
                "body": body,
            }))
            .with_duration(duration_ms))
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(ToolError::failed(
                FailureKind::Transient,
                format!("HTTP {} from {}", status.as_u16(), config.url),
            ))
        } else {
            Err(ToolError::failed(
                FailureKind::Permanent,
                format!("HTTP {} from {}", status.as_u16(), config.url),
            ))
        }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(
        &self,
        config: &ToolConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let http_config: HttpConfig = serde_json::from_value(config.config.clone())
            .map_err(|e| ToolError::Configuration(format!("Invalid http config: {}", e)))?;

        tracing::debug!(
            url = %http_config.url,
            method = ?http_config.method,
            "Executing HTTP request"
        );

        self.request(&http_config, config, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_conversion() {
        assert_eq!(Method::from(HttpMethod::GET), Method::GET);
        assert_eq!(Method::from(HttpMethod::POST), Method::POST);
        assert_eq!(Method::from(HttpMethod::DELETE), Method::DELETE);
    }

    #[test]
    fn test_http_config_defaults() {
        let config: HttpConfig =
            serde_json::from_value(serde_json::json!({"url": "https://example.com"})).unwrap();
        assert!(matches!(config.method, HttpMethod::GET));
        assert!(config.headers.is_empty());
        assert!(config.timeout_seconds.is_none());
    }

    #[test]
    fn test_http_config_invalid() {
        let tool = HttpTool::new();
        assert_eq!(tool.name(), "http");

        let result: Result<HttpConfig, _> =
            serde_json::from_value(serde_json::json!({"method": "GET"}));
        assert!(result.is_err()); // url is required
    }
}
