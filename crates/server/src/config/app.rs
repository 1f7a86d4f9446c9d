//! Application configuration for the NoETL server.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `NOETL_`:
/// - `NOETL_HOST`: Server bind address (default: "0.0.0.0")
/// - `NOETL_PORT`: Server port (default: 8082)
/// - `NOETL_LEASE_DURATION_SECONDS`: Default job lease duration
/// - `NOETL_MAX_ATTEMPTS`: Default retry count for queue jobs
/// - `NOETL_REAP_INTERVAL_SECONDS`: How often expired leases are reaped
/// - `NOETL_RUNTIME_OFFLINE_SECONDS`: Heartbeat threshold for offline workers
/// - `NOETL_QUEUE_CEILING_PER_EXECUTION`: Backpressure limit on queued jobs
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Default job lease duration in seconds
    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: u64,

    /// Default maximum lease attempts before dead-letter
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Retry backoff base in seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: f64,

    /// Retry backoff ceiling in seconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_seconds: f64,

    /// Interval between lease reap passes in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,

    /// Interval between runtime sweep passes in seconds
    #[serde(default = "default_sweep_interval")]
    pub runtime_sweep_interval: u64,

    /// Runtime offline threshold in seconds
    #[serde(default = "default_offline_seconds")]
    pub runtime_offline_seconds: i64,

    /// Ceiling on queued jobs per execution before enqueues are deferred
    #[serde(default = "default_queue_ceiling")]
    pub queue_ceiling_per_execution: i64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_server_name() -> String {
    "noetl-server".to_string()
}

fn default_lease_duration() -> u64 {
    60
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_cap() -> f64 {
    300.0
}

fn default_reap_interval() -> u64 {
    15
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_offline_seconds() -> i64 {
    60
}

fn default_queue_ceiling() -> i64 {
    1000
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `NOETL_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("NOETL_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            lease_duration_seconds: default_lease_duration(),
            max_attempts: default_max_attempts(),
            backoff_base_seconds: default_backoff_base(),
            backoff_cap_seconds: default_backoff_cap(),
            reap_interval_seconds: default_reap_interval(),
            runtime_sweep_interval: default_sweep_interval(),
            runtime_offline_seconds: default_offline_seconds(),
            queue_ceiling_per_execution: default_queue_ceiling(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8082);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.lease_duration_seconds, 60);
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8082");
    }
}
