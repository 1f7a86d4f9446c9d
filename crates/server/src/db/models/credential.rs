//! Credential model.
//!
//! Credential payloads are encrypted at rest; only the credential service
//! decrypts them, and decrypted material is served exclusively for job
//! execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database credential record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Credential {
    /// Unique credential identifier.
    pub credential_id: i64,

    /// Name referenced from playbooks; unique.
    pub name: String,

    /// Auth kind (bearer, basic, api_key, ...).
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub credential_type: String,

    /// Encrypted payload (base64 of nonce + ciphertext).
    pub encrypted_data: String,

    /// Classification tags.
    pub tags: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create or update a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// Name referenced from playbooks.
    pub name: String,

    /// Auth kind.
    #[serde(rename = "type")]
    pub credential_type: String,

    /// Plaintext payload; encrypted before storage.
    pub data: serde_json::Value,

    /// Classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Credential response for the API. The payload is never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub credential_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub tags: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(c: Credential) -> Self {
        Self {
            credential_id: c.credential_id.to_string(),
            name: c.name,
            credential_type: c.credential_type,
            tags: c.tags,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_excludes_payload() {
        let credential = Credential {
            credential_id: 1,
            name: "api_token".to_string(),
            credential_type: "bearer".to_string(),
            encrypted_data: "c2VjcmV0".to_string(),
            tags: serde_json::json!(["prod"]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = CredentialResponse::from(credential);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("c2VjcmV0"));
        assert!(json.contains("\"type\":\"bearer\""));
    }
}
