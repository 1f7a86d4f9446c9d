//! Credential handlers.
//!
//! The materialization endpoint is the only one that returns decrypted
//! payloads; it exists for workers resolving credential references at
//! dispatch time.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::db::models::{CredentialRequest, CredentialResponse};
use crate::error::AppResult;
use crate::services::CredentialService;

/// Create or update a credential.
///
/// POST /api/credentials
pub async fn create_or_update(
    State(service): State<CredentialService>,
    Json(request): Json<CredentialRequest>,
) -> AppResult<Json<CredentialResponse>> {
    let credential = service.upsert(&request).await?;
    Ok(Json(credential.into()))
}

/// List credentials (metadata only).
///
/// GET /api/credentials
pub async fn list(
    State(service): State<CredentialService>,
) -> AppResult<Json<Vec<CredentialResponse>>> {
    let credentials = service.list().await?;
    Ok(Json(credentials.into_iter().map(Into::into).collect()))
}

/// Fetch credential metadata by name.
///
/// GET /api/credentials/{name}
pub async fn get(
    State(service): State<CredentialService>,
    Path(name): Path<String>,
) -> AppResult<Json<CredentialResponse>> {
    let credential = service.get(&name).await?;
    Ok(Json(credential.into()))
}

/// Materialize a credential's decrypted payload for job execution.
///
/// GET /api/credentials/{name}/data
pub async fn materialize(
    State(service): State<CredentialService>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let credential = service.get(&name).await?;
    let data = service.materialize(&name).await?;
    Ok(Json(serde_json::json!({
        "name": credential.name,
        "type": credential.credential_type,
        "data": data,
    })))
}

/// Delete a credential.
///
/// DELETE /api/credentials/{name}
pub async fn delete(
    State(service): State<CredentialService>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    service.delete(&name).await?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}
