//! Shared application state.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;

/// State shared by handlers that are not bound to a single service.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: DbPool,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Server start time for uptime reporting
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create a new application state.
    pub fn new(db: DbPool, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            config,
            start_time: std::time::Instant::now(),
        }
    }

    /// Server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
