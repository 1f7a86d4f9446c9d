//! Execution table queries.

use chrono::{DateTime, Utc};

use crate::db::models::Execution;
use crate::db::DbPool;
use crate::error::AppResult;

/// Columns selected for execution reads.
const EXECUTION_COLUMNS: &str = "execution_id, catalog_id, status, workload, \
                                 parent_execution_id, parent_step, parent_event_id, \
                                 created_at, completed_at";

/// Allocate a new identifier from the shared sequence.
pub async fn next_id(pool: &DbPool) -> AppResult<i64> {
    let row: (i64,) = sqlx::query_as("SELECT noetl.snowflake_id()")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Insert a new execution row.
#[allow(clippy::too_many_arguments)]
pub async fn create_execution(
    pool: &DbPool,
    execution_id: i64,
    catalog_id: i64,
    workload: &serde_json::Value,
    parent_execution_id: Option<i64>,
    parent_step: Option<&str>,
    parent_event_id: Option<i64>,
) -> AppResult<Execution> {
    let query = format!(
        r#"
        INSERT INTO noetl.execution (
            execution_id, catalog_id, status, workload,
            parent_execution_id, parent_step, parent_event_id, created_at
        )
        VALUES ($1, $2, 'running', $3, $4, $5, $6, NOW())
        RETURNING {EXECUTION_COLUMNS}
        "#
    );

    let execution = sqlx::query_as::<_, Execution>(&query)
        .bind(execution_id)
        .bind(catalog_id)
        .bind(workload)
        .bind(parent_execution_id)
        .bind(parent_step)
        .bind(parent_event_id)
        .fetch_one(pool)
        .await?;

    Ok(execution)
}

/// Get an execution by id.
pub async fn get_execution(pool: &DbPool, execution_id: i64) -> AppResult<Option<Execution>> {
    let query = format!(
        r#"
        SELECT {EXECUTION_COLUMNS}
        FROM noetl.execution
        WHERE execution_id = $1
        "#
    );

    let execution = sqlx::query_as::<_, Execution>(&query)
        .bind(execution_id)
        .fetch_optional(pool)
        .await?;

    Ok(execution)
}

/// List executions, newest first.
pub async fn list_executions(pool: &DbPool, limit: i64) -> AppResult<Vec<Execution>> {
    let query = format!(
        r#"
        SELECT {EXECUTION_COLUMNS}
        FROM noetl.execution
        ORDER BY created_at DESC
        LIMIT $1
        "#
    );

    let executions = sqlx::query_as::<_, Execution>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(executions)
}

/// Project a terminal status onto the execution row.
///
/// The event log stays the source of truth; this cache makes status reads
/// cheap for the API.
pub async fn set_terminal_status(
    pool: &DbPool,
    execution_id: i64,
    status: &str,
    completed_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE noetl.execution
        SET status = $2, completed_at = $3
        WHERE execution_id = $1
          AND status NOT IN ('completed', 'failed', 'cancelled')
        "#,
    )
    .bind(execution_id)
    .bind(status)
    .bind(completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Executions whose parent is the given execution and step.
pub async fn get_child_execution(
    pool: &DbPool,
    parent_execution_id: i64,
    parent_step: &str,
) -> AppResult<Option<Execution>> {
    let query = format!(
        r#"
        SELECT {EXECUTION_COLUMNS}
        FROM noetl.execution
        WHERE parent_execution_id = $1 AND parent_step = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#
    );

    let execution = sqlx::query_as::<_, Execution>(&query)
        .bind(parent_execution_id)
        .bind(parent_step)
        .fetch_optional(pool)
        .await?;

    Ok(execution)
}
