//! Credential table queries.
//!
//! Payloads arrive here already encrypted; this module never sees
//! plaintext. Encryption and decryption live in the credential service.

use crate::db::models::Credential;
use crate::db::DbPool;
use crate::error::AppResult;

const CREDENTIAL_COLUMNS: &str =
    "credential_id, name, type, encrypted_data, tags, created_at, updated_at";

/// Create or update a credential by name.
pub async fn upsert(
    pool: &DbPool,
    name: &str,
    credential_type: &str,
    encrypted_data: &str,
    tags: &serde_json::Value,
) -> AppResult<Credential> {
    let query = format!(
        r#"
        INSERT INTO noetl.credential (name, type, encrypted_data, tags, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        ON CONFLICT (name)
        DO UPDATE SET type = EXCLUDED.type,
                      encrypted_data = EXCLUDED.encrypted_data,
                      tags = EXCLUDED.tags,
                      updated_at = NOW()
        RETURNING {CREDENTIAL_COLUMNS}
        "#
    );

    let credential = sqlx::query_as::<_, Credential>(&query)
        .bind(name)
        .bind(credential_type)
        .bind(encrypted_data)
        .bind(tags)
        .fetch_one(pool)
        .await?;

    Ok(credential)
}

/// Get a credential by name.
pub async fn get_by_name(pool: &DbPool, name: &str) -> AppResult<Option<Credential>> {
    let query = format!(
        r#"
        SELECT {CREDENTIAL_COLUMNS}
        FROM noetl.credential
        WHERE name = $1
        "#
    );

    let credential = sqlx::query_as::<_, Credential>(&query)
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(credential)
}

/// List credentials.
pub async fn list(pool: &DbPool) -> AppResult<Vec<Credential>> {
    let query = format!(
        r#"
        SELECT {CREDENTIAL_COLUMNS}
        FROM noetl.credential
        ORDER BY name ASC
        "#
    );

    let credentials = sqlx::query_as::<_, Credential>(&query)
        .fetch_all(pool)
        .await?;

    Ok(credentials)
}

/// Delete a credential by name. Returns whether a row was removed.
pub async fn delete(pool: &DbPool, name: &str) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM noetl.credential WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
