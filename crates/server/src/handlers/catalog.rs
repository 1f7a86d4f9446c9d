//! Catalog handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::db::models::{CatalogRegisterRequest, CatalogResponse};
use crate::error::{AppError, AppResult};
use crate::services::CatalogService;

/// Query parameters for resource lookup by path.
#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub path: String,
    pub version: Option<String>,
}

/// Full catalog entry including the playbook document.
#[derive(Debug, serde::Serialize)]
pub struct ResourceResponse {
    #[serde(flatten)]
    pub entry: CatalogResponse,
    pub content: String,
}

/// Register a playbook version.
///
/// POST /api/catalog/register
pub async fn register(
    State(service): State<CatalogService>,
    Json(request): Json<CatalogRegisterRequest>,
) -> AppResult<Json<CatalogResponse>> {
    let entry = service.register(&request).await?;
    Ok(Json(entry.into()))
}

/// Fetch a playbook by path (latest version unless pinned).
///
/// GET /api/catalog/resource?path=...&version=...
pub async fn get_resource(
    State(service): State<CatalogService>,
    Query(query): Query<ResourceQuery>,
) -> AppResult<Json<ResourceResponse>> {
    let entry = service
        .get_by_path(&query.path, query.version.as_deref())
        .await?;
    let content = entry.content.clone();
    Ok(Json(ResourceResponse {
        entry: entry.into(),
        content,
    }))
}

/// Fetch a playbook by catalog id.
///
/// GET /api/catalog/{catalog_id}
pub async fn get_by_id(
    State(service): State<CatalogService>,
    Path(catalog_id): Path<String>,
) -> AppResult<Json<ResourceResponse>> {
    let catalog_id = catalog_id
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid catalog_id: {}", catalog_id)))?;
    let entry = service.get_by_id(catalog_id).await?;
    let content = entry.content.clone();
    Ok(Json(ResourceResponse {
        entry: entry.into(),
        content,
    }))
}

/// List catalog entries.
///
/// GET /api/catalog
pub async fn list(State(service): State<CatalogService>) -> AppResult<Json<Vec<CatalogResponse>>> {
    let entries = service.list(500).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
