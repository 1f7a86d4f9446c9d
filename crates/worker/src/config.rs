//! Worker configuration.

use serde::Deserialize;

/// Worker configuration loaded from environment variables.
///
/// Environment variables are prefixed with `NOETL_`:
/// - `NOETL_SERVER_URL`: Server base URL (default: "http://localhost:8082")
/// - `NOETL_WORKER_POOL_NAME`: Logical pool name (default: "default")
/// - `NOETL_WORKER_POOL_RUNTIME`: Worker identity; generated if unset
/// - `NOETL_LEASE_DURATION_SECONDS`: Requested job lease duration
/// - `NOETL_HEARTBEAT_INTERVAL_SECONDS`: Lease heartbeat cadence
/// - `NOETL_POLL_INTERVAL_SECONDS`: Poll cadence when the queue is empty
/// - `NOETL_MAX_CONCURRENT_TASKS`: Concurrent job ceiling
/// - `NOETL_CAPABILITIES`: Comma-separated action types (default: "http,shell")
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Server base URL.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Logical worker pool name.
    #[serde(default = "default_pool_name")]
    pub worker_pool_name: String,

    /// Worker identity; generated from the pool name if unset.
    #[serde(default)]
    pub worker_pool_runtime: Option<String>,

    /// Requested job lease duration in seconds.
    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: u64,

    /// Lease heartbeat cadence in seconds. Must stay well under a third
    /// of the lease duration.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Poll cadence in seconds when no job is leasable.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Concurrent job ceiling.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Comma-separated action types this worker executes.
    #[serde(default = "default_capabilities")]
    pub capabilities: String,
}

fn default_server_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_pool_name() -> String {
    "default".to_string()
}

fn default_lease_duration() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    8
}

fn default_capabilities() -> String {
    "http,shell".to_string()
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("NOETL_").from_env::<WorkerConfig>()
    }

    /// The worker's unique identity, generating one when not configured.
    pub fn worker_id(&self) -> String {
        match &self.worker_pool_runtime {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}-{}", self.worker_pool_name, uuid::Uuid::new_v4()),
        }
    }

    /// Capabilities as a list.
    pub fn capability_list(&self) -> Vec<String> {
        self.capabilities
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The heartbeat cadence, clamped under a third of the lease so two
    /// missed beats still leave slack before expiry.
    pub fn effective_heartbeat_seconds(&self) -> u64 {
        let ceiling = (self.lease_duration_seconds / 3).max(1);
        self.heartbeat_interval_seconds.clamp(1, ceiling)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            worker_pool_name: default_pool_name(),
            worker_pool_runtime: None,
            lease_duration_seconds: default_lease_duration(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            poll_interval_seconds: default_poll_interval(),
            max_concurrent_tasks: default_max_concurrent(),
            capabilities: default_capabilities(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker_pool_name, "default");
        assert_eq!(config.lease_duration_seconds, 60);
        assert_eq!(config.capability_list(), vec!["http", "shell"]);
    }

    #[test]
    fn test_worker_id_generated_per_pool() {
        let config = WorkerConfig::default();
        let id = config.worker_id();
        assert!(id.starts_with("default-"));

        let pinned = WorkerConfig {
            worker_pool_runtime: Some("worker-7".to_string()),
            ..Default::default()
        };
        assert_eq!(pinned.worker_id(), "worker-7");
    }

    #[test]
    fn test_heartbeat_clamped_under_lease_third() {
        let config = WorkerConfig {
            lease_duration_seconds: 30,
            heartbeat_interval_seconds: 20,
            ..Default::default()
        };
        assert_eq!(config.effective_heartbeat_seconds(), 10);

        let config = WorkerConfig {
            lease_duration_seconds: 60,
            heartbeat_interval_seconds: 5,
            ..Default::default()
        };
        assert_eq!(config.effective_heartbeat_seconds(), 5);
    }

    #[test]
    fn test_capability_list_trims_entries() {
        let config = WorkerConfig {
            capabilities: " http , shell ,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.capability_list(), vec!["http", "shell"]);
    }
}
