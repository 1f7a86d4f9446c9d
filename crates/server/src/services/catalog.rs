//! Catalog service: versioned playbook registration and retrieval.

use crate::db::models::{Catalog, CatalogRegisterRequest};
use crate::db::queries::catalog as catalog_queries;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::playbook::parse_playbook;

/// Catalog service.
#[derive(Clone)]
pub struct CatalogService {
    db: DbPool,
}

impl CatalogService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Register a playbook version. The document is parsed up front so the
    /// catalog never stores an invalid playbook.
    pub async fn register(&self, request: &CatalogRegisterRequest) -> AppResult<Catalog> {
        parse_playbook(&request.content)?;

        let entry = catalog_queries::register(
            &self.db,
            &request.path,
            &request.version,
            &request.content,
        )
        .await?;

        tracing::info!(
            catalog_id = entry.catalog_id,
            path = %entry.path,
            version = %entry.version,
            "Playbook registered"
        );

        Ok(entry)
    }

    /// Fetch a catalog entry by id.
    pub async fn get_by_id(&self, catalog_id: i64) -> AppResult<Catalog> {
        catalog_queries::get_by_id(&self.db, catalog_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Catalog entry not found: {}", catalog_id)))
    }

    /// Fetch a catalog entry by path, optionally pinned to a version.
    pub async fn get_by_path(&self, path: &str, version: Option<&str>) -> AppResult<Catalog> {
        catalog_queries::get_by_path_version(&self.db, path, version)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playbook not found: {}", path)))
    }

    /// List catalog entries.
    pub async fn list(&self, limit: i64) -> AppResult<Vec<Catalog>> {
        catalog_queries::list(&self.db, limit).await
    }
}
