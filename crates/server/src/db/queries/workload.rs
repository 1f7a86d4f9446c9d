//! Per-execution workload blob queries.
//!
//! The workload table holds merge-able intermediate state persisted by
//! steps with a `save` block, separate from the immutable event log.

use crate::db::DbPool;
use crate::error::AppResult;

/// Initialize the workload blob for an execution.
pub async fn init(pool: &DbPool, execution_id: i64, data: &serde_json::Value) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO noetl.workload (execution_id, data, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (execution_id)
        DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
        "#,
    )
    .bind(execution_id)
    .bind(data)
    .execute(pool)
    .await?;

    Ok(())
}

/// Shallow-merge new keys into the execution's workload blob.
pub async fn merge(pool: &DbPool, execution_id: i64, patch: &serde_json::Value) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO noetl.workload (execution_id, data, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (execution_id)
        DO UPDATE SET data = noetl.workload.data || EXCLUDED.data, updated_at = NOW()
        "#,
    )
    .bind(execution_id)
    .bind(patch)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the workload blob for an execution.
pub async fn get(pool: &DbPool, execution_id: i64) -> AppResult<Option<serde_json::Value>> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT data FROM noetl.workload WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(data,)| data))
}
