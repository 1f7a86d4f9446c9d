//! Schema initialization for the `noetl` PostgreSQL schema.
//!
//! All engine state lives in these tables; the event table is append-only
//! and is the sole source of truth for execution state.

use crate::db::DbPool;
use crate::error::AppResult;

/// DDL statements executed in order by [`init_schema`].
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS noetl",
    "CREATE SEQUENCE IF NOT EXISTS noetl.object_id_seq",
    r#"
    CREATE OR REPLACE FUNCTION noetl.snowflake_id() RETURNS BIGINT AS $$
        SELECT ((EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT << 20)
             | (nextval('noetl.object_id_seq') % 1048576)
    $$ LANGUAGE SQL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.event (
        execution_id    BIGINT NOT NULL,
        event_id        BIGINT NOT NULL,
        event_type      TEXT NOT NULL,
        node_id         TEXT NOT NULL,
        parent_event_id BIGINT,
        status          TEXT NOT NULL,
        payload         JSONB,
        context         JSONB,
        idempotency_key TEXT,
        trace_id        TEXT,
        parent_span_id  TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (execution_id, event_id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS event_execution_idem_uq
        ON noetl.event (execution_id, idempotency_key)
        WHERE idempotency_key IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS event_node_latest_ix
        ON noetl.event (execution_id, node_id, event_id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.queue (
        queue_id          BIGINT PRIMARY KEY DEFAULT noetl.snowflake_id(),
        execution_id      BIGINT NOT NULL,
        node_id           TEXT NOT NULL,
        action            JSONB NOT NULL,
        context           JSONB NOT NULL DEFAULT '{}'::jsonb,
        catalog_id        BIGINT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'queued',
        lease_holder      TEXT,
        lease_expires_at  TIMESTAMPTZ,
        attempts          INTEGER NOT NULL DEFAULT 0,
        max_attempts      INTEGER NOT NULL DEFAULT 3,
        priority          INTEGER NOT NULL DEFAULT 0,
        available_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        worker_pool_label TEXT,
        idempotency_key   TEXT,
        last_error        TEXT,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS queue_idempotency_uq
        ON noetl.queue (idempotency_key)
        WHERE idempotency_key IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS queue_leasable_ix
        ON noetl.queue (priority, available_at, queue_id)
        WHERE status = 'queued'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS queue_lease_expiry_ix
        ON noetl.queue (lease_expires_at)
        WHERE status = 'leased'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.execution (
        execution_id        BIGINT PRIMARY KEY,
        catalog_id          BIGINT NOT NULL,
        status              TEXT NOT NULL DEFAULT 'pending',
        workload            JSONB NOT NULL DEFAULT '{}'::jsonb,
        parent_execution_id BIGINT,
        parent_step         TEXT,
        parent_event_id     BIGINT,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at        TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.runtime (
        runtime_id        TEXT PRIMARY KEY,
        pool_name         TEXT NOT NULL,
        capabilities      JSONB NOT NULL DEFAULT '[]'::jsonb,
        status            TEXT NOT NULL DEFAULT 'ready',
        last_heartbeat_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        registered_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.credential (
        credential_id  BIGINT PRIMARY KEY DEFAULT noetl.snowflake_id(),
        name           TEXT NOT NULL UNIQUE,
        type           TEXT NOT NULL,
        encrypted_data TEXT NOT NULL,
        tags           JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.catalog (
        catalog_id   BIGINT PRIMARY KEY DEFAULT noetl.snowflake_id(),
        path         TEXT NOT NULL,
        version      TEXT NOT NULL,
        content      TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (path, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS noetl.workload (
        execution_id BIGINT PRIMARY KEY,
        data         JSONB NOT NULL DEFAULT '{}'::jsonb,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create the schema, tables, and indexes if they do not exist. Idempotent.
pub async fn init_schema(pool: &DbPool) -> AppResult<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(statements = SCHEMA_STATEMENTS.len(), "Schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statement_order() {
        // Schema and sequence must come before tables that reference them.
        assert!(SCHEMA_STATEMENTS[0].contains("CREATE SCHEMA"));
        assert!(SCHEMA_STATEMENTS[1].contains("CREATE SEQUENCE"));
        let queue_pos = SCHEMA_STATEMENTS
            .iter()
            .position(|s| s.contains("noetl.queue"))
            .unwrap();
        let fn_pos = SCHEMA_STATEMENTS
            .iter()
            .position(|s| s.contains("snowflake_id() RETURNS"))
            .unwrap();
        assert!(fn_pos < queue_pos);
    }
}
