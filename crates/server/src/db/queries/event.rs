//! Event log queries.
//!
//! The event table is append-only. `event_id` is allocated per execution as
//! `MAX(event_id) + 1` inside the insert statement; concurrent appends race
//! on the primary key and retry, which preserves strict monotonicity without
//! a global lock.

use crate::db::models::{Event, EventAppendRequest};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Columns selected for event reads.
const EVENT_COLUMNS: &str = "execution_id, event_id, event_type, node_id, parent_event_id, \
                             status, payload, context, trace_id, parent_span_id, created_at";

/// Bounded retries for the event-id allocation race.
const MAX_APPEND_RETRIES: usize = 8;

/// Append an event, assigning the next monotonic id for the execution.
///
/// If the request carries an `idempotency_key` that was already used for
/// this execution, the existing event is returned and nothing is written.
pub async fn append_event(pool: &DbPool, request: &EventAppendRequest) -> AppResult<Event> {
    if let Some(key) = &request.idempotency_key {
        if let Some(existing) =
            get_event_by_idempotency_key(pool, request.execution_id, key).await?
        {
            return Ok(existing);
        }
    }

    let insert = format!(
        r#"
        INSERT INTO noetl.event (
            execution_id, event_id, event_type, node_id, parent_event_id,
            status, payload, context, idempotency_key, trace_id, parent_span_id, created_at
        )
        SELECT $1,
               COALESCE((SELECT MAX(event_id) FROM noetl.event WHERE execution_id = $1), 0) + 1,
               $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()
        RETURNING {EVENT_COLUMNS}
        "#
    );

    for _ in 0..MAX_APPEND_RETRIES {
        let result = sqlx::query_as::<_, Event>(&insert)
            .bind(request.execution_id)
            .bind(&request.event_type)
            .bind(&request.node_id)
            .bind(request.parent_event_id)
            .bind(&request.status)
            .bind(&request.payload)
            .bind(&request.context)
            .bind(&request.idempotency_key)
            .bind(&request.trace_id)
            .bind(&request.parent_span_id)
            .fetch_one(pool)
            .await;

        match result {
            Ok(event) => return Ok(event),
            Err(sqlx::Error::Database(db_err))
                if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                if db_err.constraint() == Some("event_execution_idem_uq") {
                    // Lost the idempotency race; the winner's event is ours.
                    if let Some(key) = &request.idempotency_key {
                        if let Some(existing) =
                            get_event_by_idempotency_key(pool, request.execution_id, key).await?
                        {
                            return Ok(existing);
                        }
                    }
                    return Err(AppError::Conflict(format!(
                        "Duplicate event for execution {}",
                        request.execution_id
                    )));
                }
                // Primary-key race on event_id: another append won; retry.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict(format!(
        "Could not allocate event_id for execution {} after {} attempts",
        request.execution_id, MAX_APPEND_RETRIES
    )))
}

/// Get an event by its idempotency key.
pub async fn get_event_by_idempotency_key(
    pool: &DbPool,
    execution_id: i64,
    idempotency_key: &str,
) -> AppResult<Option<Event>> {
    let query = format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM noetl.event
        WHERE execution_id = $1 AND idempotency_key = $2
        "#
    );

    let event = sqlx::query_as::<_, Event>(&query)
        .bind(execution_id)
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Get all events for an execution with `event_id > since_event_id`,
/// strictly ordered by `event_id`.
pub async fn get_events(
    pool: &DbPool,
    execution_id: i64,
    since_event_id: i64,
) -> AppResult<Vec<Event>> {
    let query = format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM noetl.event
        WHERE execution_id = $1 AND event_id > $2
        ORDER BY event_id ASC
        "#
    );

    let events = sqlx::query_as::<_, Event>(&query)
        .bind(execution_id)
        .bind(since_event_id)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Get the most recent event for a node within an execution.
pub async fn get_latest_event_by_node(
    pool: &DbPool,
    execution_id: i64,
    node_id: &str,
) -> AppResult<Option<Event>> {
    let query = format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM noetl.event
        WHERE execution_id = $1 AND node_id = $2
        ORDER BY event_id DESC
        LIMIT 1
        "#
    );

    let event = sqlx::query_as::<_, Event>(&query)
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Get the most recent event of a given type for an execution.
pub async fn get_latest_event_by_type(
    pool: &DbPool,
    execution_id: i64,
    event_type: &str,
) -> AppResult<Option<Event>> {
    let query = format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM noetl.event
        WHERE execution_id = $1 AND event_type = $2
        ORDER BY event_id DESC
        LIMIT 1
        "#
    );

    let event = sqlx::query_as::<_, Event>(&query)
        .bind(execution_id)
        .bind(event_type)
        .fetch_optional(pool)
        .await?;

    Ok(event)
}

/// Count events for an execution.
pub async fn count_events(pool: &DbPool, execution_id: i64) -> AppResult<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM noetl.event
        WHERE execution_id = $1
        "#,
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await?;

    Ok(count.0)
}
