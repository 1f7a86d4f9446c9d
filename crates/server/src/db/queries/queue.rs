//! Job queue queries.
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent workers never claim
//! the same row and never wait on each other. All lifecycle transitions
//! check `lease_holder` so a reclaimed lease surfaces as `LeaseLost`.

use chrono::{DateTime, Utc};

use crate::db::models::{FailOutcome, QueueJob, QueueJobSpec, RetryPolicy};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Columns selected for queue reads.
const QUEUE_COLUMNS: &str = "queue_id, execution_id, node_id, action, context, catalog_id, \
                             status, lease_holder, lease_expires_at, attempts, max_attempts, \
                             priority, available_at, worker_pool_label, idempotency_key, \
                             last_error, created_at, updated_at";

/// Insert a new job. Idempotent by `idempotency_key`: a second enqueue with
/// the same key returns the existing `queue_id` without duplicating.
pub async fn enqueue(
    pool: &DbPool,
    spec: &QueueJobSpec,
    default_max_attempts: i32,
) -> AppResult<i64> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO noetl.queue (
            execution_id, node_id, action, context, catalog_id,
            priority, max_attempts, available_at, worker_pool_label, idempotency_key
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, NOW()), $9, $10)
        ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL
        DO NOTHING
        RETURNING queue_id
        "#,
    )
        .bind(spec.execution_id)
        .bind(&spec.node_id)
        .bind(&spec.action)
        .bind(&spec.context)
        .bind(spec.catalog_id)
        .bind(spec.priority)
        .bind(spec.max_attempts.unwrap_or(default_max_attempts))
        .bind(spec.available_at)
        .bind(&spec.worker_pool_label)
        .bind(&spec.idempotency_key)
        .fetch_optional(pool)
        .await?;

    if let Some((queue_id,)) = inserted {
        return Ok(queue_id);
    }

    // Conflict on the idempotency key: the job already exists.
    let key = spec.idempotency_key.as_deref().ok_or_else(|| {
        AppError::Conflict("Enqueue conflict without idempotency key".to_string())
    })?;

    let existing: (i64,) =
        sqlx::query_as("SELECT queue_id FROM noetl.queue WHERE idempotency_key = $1")
            .bind(key)
            .fetch_one(pool)
            .await?;

    Ok(existing.0)
}

/// Atomically lease one job for a worker.
///
/// Selects the most urgent leasable job matching the worker's pool and
/// capabilities, transitions it to `leased`, and increments `attempts`.
/// Returns `None` if nothing is leasable.
pub async fn lease(
    pool: &DbPool,
    worker_id: &str,
    pool_label: &str,
    capabilities: &[String],
    lease_duration_seconds: u64,
) -> AppResult<Option<QueueJob>> {
    let query = format!(
        r#"
        WITH leasable AS (
            SELECT queue_id
            FROM noetl.queue
            WHERE status = 'queued'
              AND available_at <= NOW()
              AND (worker_pool_label IS NULL OR worker_pool_label = $2)
              AND action->>'kind' = ANY($3)
            ORDER BY priority ASC, available_at ASC, queue_id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE noetl.queue q
        SET status = 'leased',
            lease_holder = $1,
            lease_expires_at = NOW() + make_interval(secs => $4),
            attempts = attempts + 1,
            updated_at = NOW()
        FROM leasable
        WHERE q.queue_id = leasable.queue_id
        RETURNING {QUEUE_COLUMNS}
        "#
    );

    let job = sqlx::query_as::<_, QueueJob>(&query)
        .bind(worker_id)
        .bind(pool_label)
        .bind(capabilities)
        .bind(lease_duration_seconds as f64)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// Extend the lease on a job. Fails with `LeaseLost` if the caller no
/// longer holds a live lease.
pub async fn heartbeat(
    pool: &DbPool,
    queue_id: i64,
    worker_id: &str,
    lease_duration_seconds: u64,
) -> AppResult<DateTime<Utc>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        UPDATE noetl.queue
        SET lease_expires_at = NOW() + make_interval(secs => $3),
            updated_at = NOW()
        WHERE queue_id = $1
          AND lease_holder = $2
          AND status = 'leased'
          AND lease_expires_at > NOW()
        RETURNING lease_expires_at
        "#,
    )
    .bind(queue_id)
    .bind(worker_id)
    .bind(lease_duration_seconds as f64)
    .fetch_optional(pool)
    .await?;

    row.map(|(expires,)| expires)
        .ok_or_else(|| AppError::LeaseLost(format!("queue_id={}", queue_id)))
}

/// Transition a leased job to `completed`. Fails with `LeaseLost` if the
/// lease was reclaimed.
pub async fn complete(pool: &DbPool, queue_id: i64, worker_id: &str) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'completed',
            lease_holder = NULL,
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE queue_id = $1
          AND lease_holder = $2
          AND status = 'leased'
        "#,
    )
    .bind(queue_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::LeaseLost(format!("queue_id={}", queue_id)));
    }

    Ok(())
}

/// Fail a leased job.
///
/// Retryable failures below the attempt ceiling re-queue with exponential
/// backoff; everything else dead-letters. Fails with `LeaseLost` if the
/// lease was reclaimed.
pub async fn fail(
    pool: &DbPool,
    queue_id: i64,
    worker_id: &str,
    error: &str,
    retryable: bool,
    policy: &RetryPolicy,
) -> AppResult<FailOutcome> {
    let mut tx = pool.begin().await?;

    let row: Option<(i32, i32)> = sqlx::query_as(
        r#"
        SELECT attempts, max_attempts
        FROM noetl.queue
        WHERE queue_id = $1
          AND lease_holder = $2
          AND status = 'leased'
        FOR UPDATE
        "#,
    )
    .bind(queue_id)
    .bind(worker_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((attempts, max_attempts)) = row else {
        return Err(AppError::LeaseLost(format!("queue_id={}", queue_id)));
    };

    let outcome = if retryable && attempts < max_attempts {
        let delay = policy.backoff_seconds(attempts);
        let row: (DateTime<Utc>,) = sqlx::query_as(
            r#"
            UPDATE noetl.queue
            SET status = 'queued',
                lease_holder = NULL,
                lease_expires_at = NULL,
                available_at = NOW() + make_interval(secs => $2),
                last_error = $3,
                updated_at = NOW()
            WHERE queue_id = $1
            RETURNING available_at
            "#,
        )
        .bind(queue_id)
        .bind(delay)
        .bind(error)
        .fetch_one(&mut *tx)
        .await?;

        FailOutcome::Requeued {
            available_at: row.0,
        }
    } else {
        sqlx::query(
            r#"
            UPDATE noetl.queue
            SET status = 'dead_letter',
                lease_holder = NULL,
                lease_expires_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        FailOutcome::DeadLettered
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Jobs reclaimed by one reap pass.
#[derive(Debug, Default)]
pub struct ReapResult {
    /// Jobs returned to the queue for another attempt.
    pub requeued: u64,
    /// Jobs that exhausted their attempts while expired.
    pub dead_lettered: Vec<QueueJob>,
}

impl ReapResult {
    pub fn total(&self) -> u64 {
        self.requeued + self.dead_lettered.len() as u64
    }
}

/// Reclaim every job whose lease has expired, treating expiry as an
/// implicit failure under the same retry policy. Idempotent.
pub async fn reap_expired(pool: &DbPool, policy: &RetryPolicy) -> AppResult<ReapResult> {
    let mut tx = pool.begin().await?;

    let requeued = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'queued',
            lease_holder = NULL,
            lease_expires_at = NULL,
            available_at = NOW() + make_interval(
                secs => LEAST($1 * POWER(2, attempts) * (0.75 + random() * 0.5), $2)
            ),
            last_error = 'lease expired',
            updated_at = NOW()
        WHERE status = 'leased'
          AND lease_expires_at < NOW()
          AND attempts < max_attempts
        "#,
    )
    .bind(policy.backoff_base_seconds)
    .bind(policy.backoff_cap_seconds)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let dead_letter_query = format!(
        r#"
        UPDATE noetl.queue
        SET status = 'dead_letter',
            lease_holder = NULL,
            lease_expires_at = NULL,
            last_error = 'lease expired; retries exhausted',
            updated_at = NOW()
        WHERE status = 'leased'
          AND lease_expires_at < NOW()
          AND attempts >= max_attempts
        RETURNING {QUEUE_COLUMNS}
        "#
    );

    let dead_lettered = sqlx::query_as::<_, QueueJob>(&dead_letter_query)
        .fetch_all(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ReapResult {
        requeued,
        dead_lettered,
    })
}

/// Get a job by id.
pub async fn get_job(pool: &DbPool, queue_id: i64) -> AppResult<Option<QueueJob>> {
    let query = format!(
        r#"
        SELECT {QUEUE_COLUMNS}
        FROM noetl.queue
        WHERE queue_id = $1
        "#
    );

    let job = sqlx::query_as::<_, QueueJob>(&query)
        .bind(queue_id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// Count jobs still queued for an execution (backpressure input).
pub async fn count_queued(pool: &DbPool, execution_id: i64) -> AppResult<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM noetl.queue
        WHERE execution_id = $1 AND status = 'queued'
        "#,
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await?;

    Ok(count.0)
}

/// Mark still-queued jobs whose node matches a prefix as failed, without
/// touching leased ones. Used when an iterator aborts early.
pub async fn cancel_queued_by_prefix(
    pool: &DbPool,
    execution_id: i64,
    node_prefix: &str,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'failed',
            last_error = 'loop aborted',
            updated_at = NOW()
        WHERE execution_id = $1
          AND status = 'queued'
          AND node_id LIKE $2
        "#,
    )
    .bind(execution_id)
    .bind(format!("{}%", node_prefix))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Best-effort cancellation of an execution's jobs.
///
/// Queued jobs are marked failed so they are never leased; leased jobs get
/// their lease expiry pulled to now and their attempt ceiling clamped, so
/// the next reap pass dead-letters them and the holder's heartbeat fails.
pub async fn cancel_execution_jobs(pool: &DbPool, execution_id: i64) -> AppResult<u64> {
    let mut tx = pool.begin().await?;

    let queued = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'failed',
            last_error = 'execution cancelled',
            updated_at = NOW()
        WHERE execution_id = $1 AND status = 'queued'
        "#,
    )
    .bind(execution_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let leased = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET lease_expires_at = NOW(),
            max_attempts = attempts,
            last_error = 'execution cancelled',
            updated_at = NOW()
        WHERE execution_id = $1 AND status = 'leased'
        "#,
    )
    .bind(execution_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(queued + leased)
}
