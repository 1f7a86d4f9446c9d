//! Worker runtime registration queries.

use crate::db::models::{Runtime, RuntimeRegisterRequest};
use crate::db::DbPool;
use crate::error::AppResult;

const RUNTIME_COLUMNS: &str =
    "runtime_id, pool_name, capabilities, status, last_heartbeat_at, registered_at";

/// Register a worker runtime, replacing any previous registration with the
/// same id.
pub async fn register(pool: &DbPool, request: &RuntimeRegisterRequest) -> AppResult<Runtime> {
    let query = format!(
        r#"
        INSERT INTO noetl.runtime (runtime_id, pool_name, capabilities, status,
                                   last_heartbeat_at, registered_at)
        VALUES ($1, $2, $3, 'ready', NOW(), NOW())
        ON CONFLICT (runtime_id)
        DO UPDATE SET pool_name = EXCLUDED.pool_name,
                      capabilities = EXCLUDED.capabilities,
                      status = 'ready',
                      last_heartbeat_at = NOW()
        RETURNING {RUNTIME_COLUMNS}
        "#
    );

    let runtime = sqlx::query_as::<_, Runtime>(&query)
        .bind(&request.runtime_id)
        .bind(&request.pool_name)
        .bind(serde_json::json!(request.capabilities))
        .fetch_one(pool)
        .await?;

    Ok(runtime)
}

/// Record a liveness heartbeat. Returns `false` if no registration exists,
/// letting the caller auto-recreate it.
pub async fn heartbeat(pool: &DbPool, runtime_id: &str) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.runtime
        SET last_heartbeat_at = NOW(),
            status = CASE WHEN status = 'offline' THEN 'ready' ELSE status END
        WHERE runtime_id = $1
        "#,
    )
    .bind(runtime_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a runtime as draining or offline.
pub async fn set_status(pool: &DbPool, runtime_id: &str, status: &str) -> AppResult<()> {
    sqlx::query("UPDATE noetl.runtime SET status = $2 WHERE runtime_id = $1")
        .bind(runtime_id)
        .bind(status)
        .execute(pool)
        .await?;

    Ok(())
}

/// Mark registrations offline whose heartbeat is older than the threshold.
/// Their leased jobs fall back through the queue reaper.
pub async fn sweep_offline(pool: &DbPool, offline_threshold_seconds: i64) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.runtime
        SET status = 'offline'
        WHERE status <> 'offline'
          AND last_heartbeat_at < NOW() - make_interval(secs => $1)
        "#,
    )
    .bind(offline_threshold_seconds as f64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// List all registrations.
pub async fn list(pool: &DbPool) -> AppResult<Vec<Runtime>> {
    let query = format!(
        r#"
        SELECT {RUNTIME_COLUMNS}
        FROM noetl.runtime
        ORDER BY registered_at DESC
        "#
    );

    let runtimes = sqlx::query_as::<_, Runtime>(&query).fetch_all(pool).await?;

    Ok(runtimes)
}
