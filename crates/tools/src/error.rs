//! Tool execution error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an action failure.
///
/// Recorded as `failure_kind` in `action_failed` event payloads and used by
/// the queue to decide between retry-with-backoff and dead-letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or transient backend failure; the queue retries with backoff.
    Transient,
    /// Invalid request or bad data; dead-lettered without further retry.
    Permanent,
    /// Template rendering failed; not retried.
    TemplateError,
    /// Credential resolution or auth rejection; not retried.
    AuthError,
    /// Executor or job timeout; retried unless policy declares permanent.
    Timeout,
    /// Cancelled by the execution or by lease loss.
    Cancelled,
    /// Retries exhausted; emitted by the queue on dead-letter.
    RetryExhausted,
}

impl FailureKind {
    /// Whether the queue should re-attempt a job that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::TemplateError => "template_error",
            FailureKind::AuthError => "auth_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::RetryExhausted => "retry_exhausted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found in registry.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Process spawn or wait error.
    #[error("Process error: {0}")]
    Process(String),

    /// Tool execution timed out.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Execution was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Executor-declared failure with an explicit classification.
    #[error("{message}")]
    Failed { kind: FailureKind, message: String },
}

impl ToolError {
    /// Create an executor failure with an explicit classification.
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        ToolError::Failed {
            kind,
            message: message.into(),
        }
    }

    /// The failure classification for this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ToolError::NotFound(_) => FailureKind::Permanent,
            ToolError::Configuration(_) => FailureKind::Permanent,
            ToolError::Template(_) => FailureKind::TemplateError,
            ToolError::Auth(_) => FailureKind::AuthError,
            ToolError::Http(_) => FailureKind::Transient,
            ToolError::Process(_) => FailureKind::Transient,
            ToolError::Timeout(_) => FailureKind::Timeout,
            ToolError::Cancelled => FailureKind::Cancelled,
            ToolError::Json(_) => FailureKind::Permanent,
            ToolError::Io(_) => FailureKind::Transient,
            ToolError::Failed { kind, .. } => *kind,
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ToolError::Timeout(0)
        } else {
            ToolError::Http(e.to_string())
        }
    }
}

impl From<minijinja::Error> for ToolError {
    fn from(e: minijinja::Error) -> Self {
        ToolError::Template(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolError::NotFound("shell".to_string());
        assert_eq!(err.to_string(), "Tool not found: shell");

        let err = ToolError::Timeout(30);
        assert_eq!(err.to_string(), "Execution timed out after 30 seconds");
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            ToolError::Http("connection refused".to_string()).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            ToolError::Auth("bad token".to_string()).failure_kind(),
            FailureKind::AuthError
        );
        assert_eq!(
            ToolError::failed(FailureKind::Permanent, "404").failure_kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
        assert!(!FailureKind::AuthError.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::TemplateError).unwrap();
        assert_eq!(json, "\"template_error\"");
        let kind: FailureKind = serde_json::from_str("\"retry_exhausted\"").unwrap();
        assert_eq!(kind, FailureKind::RetryExhausted);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tool_err: ToolError = io_err.into();
        assert!(matches!(tool_err, ToolError::Io(_)));
    }
}
