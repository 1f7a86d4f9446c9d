//! Worker runtime registration model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Worker registration status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Ready,
    Busy,
    Draining,
    Offline,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::Busy => "busy",
            RuntimeStatus::Draining => "draining",
            RuntimeStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RuntimeStatus {
    fn from(s: &str) -> Self {
        match s {
            "ready" => RuntimeStatus::Ready,
            "busy" => RuntimeStatus::Busy,
            "draining" => RuntimeStatus::Draining,
            "offline" => RuntimeStatus::Offline,
            _ => RuntimeStatus::Ready,
        }
    }
}

/// Database runtime registration record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Runtime {
    /// Unique worker process identifier.
    pub runtime_id: String,

    /// Logical pool grouping; multiple workers may share a name.
    pub pool_name: String,

    /// Action-type tags this worker can handle.
    pub capabilities: serde_json::Value,

    /// Registration status.
    pub status: String,

    /// Most recent liveness signal.
    pub last_heartbeat_at: DateTime<Utc>,

    pub registered_at: DateTime<Utc>,
}

impl Runtime {
    /// Capabilities as a string list.
    pub fn capability_list(&self) -> Vec<String> {
        self.capabilities
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Request to register a worker runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeRegisterRequest {
    /// Unique worker process identifier.
    pub runtime_id: String,

    /// Logical pool grouping.
    pub pool_name: String,

    /// Action-type tags this worker can handle.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RuntimeStatus::Ready,
            RuntimeStatus::Busy,
            RuntimeStatus::Draining,
            RuntimeStatus::Offline,
        ] {
            assert_eq!(RuntimeStatus::from(status.as_str()), status);
        }
    }

    #[test]
    fn test_capability_list() {
        let runtime = Runtime {
            runtime_id: "worker-1".to_string(),
            pool_name: "default".to_string(),
            capabilities: serde_json::json!(["http", "shell"]),
            status: "ready".to_string(),
            last_heartbeat_at: Utc::now(),
            registered_at: Utc::now(),
        };

        assert_eq!(runtime.capability_list(), vec!["http", "shell"]);
    }
}
