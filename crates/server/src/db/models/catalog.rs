//! Catalog model: versioned playbook storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database catalog record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Catalog {
    /// Unique catalog entry identifier.
    pub catalog_id: i64,

    /// Playbook path; `(path, version)` is unique.
    pub path: String,

    /// Playbook version.
    pub version: String,

    /// Playbook document (YAML or JSON text).
    pub content: String,

    /// Hash of the content for change detection.
    pub content_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Request to register a playbook in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRegisterRequest {
    /// Playbook path.
    pub path: String,

    /// Playbook version; defaults to "1" if omitted.
    #[serde(default = "default_version")]
    pub version: String,

    /// Playbook document text.
    pub content: String,
}

fn default_version() -> String {
    "1".to_string()
}

/// Catalog response for the API. All IDs are serialized as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub catalog_id: String,
    pub path: String,
    pub version: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<Catalog> for CatalogResponse {
    fn from(c: Catalog) -> Self {
        Self {
            catalog_id: c.catalog_id.to_string(),
            path: c.path,
            version: c.version,
            content_hash: c.content_hash,
            created_at: c.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_default_version() {
        let request: CatalogRegisterRequest = serde_json::from_str(
            r#"{"path": "workflows/etl", "content": "name: etl"}"#,
        )
        .unwrap();
        assert_eq!(request.version, "1");
    }
}
