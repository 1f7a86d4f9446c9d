//! Catalog table queries.

use crate::db::models::Catalog;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

const CATALOG_COLUMNS: &str = "catalog_id, path, version, content, content_hash, created_at";

/// Register a playbook version. `(path, version)` is unique; re-registering
/// the same pair with identical content returns the existing entry, while
/// different content is a conflict.
pub async fn register(
    pool: &DbPool,
    path: &str,
    version: &str,
    content: &str,
) -> AppResult<Catalog> {
    if let Some(existing) = get_by_path_version(pool, path, Some(version)).await? {
        let same: (bool,) = sqlx::query_as("SELECT md5($1) = $2")
            .bind(content)
            .bind(&existing.content_hash)
            .fetch_one(pool)
            .await?;
        if same.0 {
            return Ok(existing);
        }
        return Err(AppError::Conflict(format!(
            "Catalog entry {}@{} already exists with different content",
            path, version
        )));
    }

    let query = format!(
        r#"
        INSERT INTO noetl.catalog (path, version, content, content_hash, created_at)
        VALUES ($1, $2, $3, md5($3), NOW())
        RETURNING {CATALOG_COLUMNS}
        "#
    );

    let catalog = sqlx::query_as::<_, Catalog>(&query)
        .bind(path)
        .bind(version)
        .bind(content)
        .fetch_one(pool)
        .await?;

    Ok(catalog)
}

/// Get a catalog entry by id.
pub async fn get_by_id(pool: &DbPool, catalog_id: i64) -> AppResult<Option<Catalog>> {
    let query = format!(
        r#"
        SELECT {CATALOG_COLUMNS}
        FROM noetl.catalog
        WHERE catalog_id = $1
        "#
    );

    let catalog = sqlx::query_as::<_, Catalog>(&query)
        .bind(catalog_id)
        .fetch_optional(pool)
        .await?;

    Ok(catalog)
}

/// Get a catalog entry by path and optional version. Without a version the
/// latest registration wins.
pub async fn get_by_path_version(
    pool: &DbPool,
    path: &str,
    version: Option<&str>,
) -> AppResult<Option<Catalog>> {
    let catalog = if let Some(version) = version {
        let query = format!(
            r#"
            SELECT {CATALOG_COLUMNS}
            FROM noetl.catalog
            WHERE path = $1 AND version = $2
            "#
        );
        sqlx::query_as::<_, Catalog>(&query)
            .bind(path)
            .bind(version)
            .fetch_optional(pool)
            .await?
    } else {
        let query = format!(
            r#"
            SELECT {CATALOG_COLUMNS}
            FROM noetl.catalog
            WHERE path = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, Catalog>(&query)
            .bind(path)
            .fetch_optional(pool)
            .await?
    };

    Ok(catalog)
}

/// List catalog entries.
pub async fn list(pool: &DbPool, limit: i64) -> AppResult<Vec<Catalog>> {
    let query = format!(
        r#"
        SELECT {CATALOG_COLUMNS}
        FROM noetl.catalog
        ORDER BY path ASC, created_at DESC
        LIMIT $1
        "#
    );

    let entries = sqlx::query_as::<_, Catalog>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(entries)
}
