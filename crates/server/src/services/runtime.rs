//! Runtime service: worker registration and liveness.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::models::{Runtime, RuntimeRegisterRequest};
use crate::db::queries::runtime as runtime_queries;
use crate::db::DbPool;
use crate::error::AppResult;

/// Runtime service.
#[derive(Clone)]
pub struct RuntimeService {
    db: DbPool,
    config: Arc<AppConfig>,
}

impl RuntimeService {
    pub fn new(db: DbPool, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Register a worker runtime.
    pub async fn register(&self, request: &RuntimeRegisterRequest) -> AppResult<Runtime> {
        let runtime = runtime_queries::register(&self.db, request).await?;

        tracing::info!(
            runtime_id = %runtime.runtime_id,
            pool_name = %runtime.pool_name,
            capabilities = %runtime.capabilities,
            "Worker registered"
        );

        Ok(runtime)
    }

    /// Record a worker heartbeat, auto-recreating a missing registration.
    pub async fn heartbeat(&self, request: &RuntimeRegisterRequest) -> AppResult<()> {
        if !runtime_queries::heartbeat(&self.db, &request.runtime_id).await? {
            tracing::info!(
                runtime_id = %request.runtime_id,
                "Heartbeat for unknown runtime; re-registering"
            );
            runtime_queries::register(&self.db, request).await?;
        }
        Ok(())
    }

    /// Mark a worker as draining before shutdown.
    pub async fn drain(&self, runtime_id: &str) -> AppResult<()> {
        runtime_queries::set_status(&self.db, runtime_id, "draining").await
    }

    /// List registrations.
    pub async fn list(&self) -> AppResult<Vec<Runtime>> {
        runtime_queries::list(&self.db).await
    }

    /// Mark registrations offline past the heartbeat threshold. Their
    /// leases fall back through the queue reaper.
    pub async fn sweep_offline(&self) -> AppResult<u64> {
        let swept =
            runtime_queries::sweep_offline(&self.db, self.config.runtime_offline_seconds).await?;
        if swept > 0 {
            tracing::warn!(swept, "Marked stale worker registrations offline");
        }
        Ok(swept)
    }
}
