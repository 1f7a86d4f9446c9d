//! Credential service: encryption at rest, decryption only for job
//! execution.

use crate::crypto::Encryptor;
use crate::db::models::{Credential, CredentialRequest};
use crate::db::queries::credential as credential_queries;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Credential service.
#[derive(Clone)]
pub struct CredentialService {
    db: DbPool,
    encryptor: Encryptor,
}

impl CredentialService {
    /// Create a credential service with the given base64 encryption key.
    pub fn new(db: DbPool, encryption_key: &str) -> AppResult<Self> {
        Ok(Self {
            db,
            encryptor: Encryptor::from_base64(encryption_key)?,
        })
    }

    /// Create or update a credential. The payload is encrypted before it
    /// reaches the database.
    pub async fn upsert(&self, request: &CredentialRequest) -> AppResult<Credential> {
        if request.name.is_empty() {
            return Err(AppError::Validation(
                "Credential name must not be empty".to_string(),
            ));
        }

        let encrypted = self.encryptor.encrypt_json(&request.data)?;
        let tags = serde_json::json!(request.tags);

        let credential = credential_queries::upsert(
            &self.db,
            &request.name,
            &request.credential_type,
            &encrypted,
            &tags,
        )
        .await?;

        tracing::info!(name = %credential.name, "Credential stored");
        Ok(credential)
    }

    /// Fetch credential metadata by name.
    pub async fn get(&self, name: &str) -> AppResult<Credential> {
        credential_queries::get_by_name(&self.db, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential not found: {}", name)))
    }

    /// Materialize a credential's decrypted payload for job execution.
    /// This is the only decryption path.
    pub async fn materialize(&self, name: &str) -> AppResult<serde_json::Value> {
        let credential = self.get(name).await?;
        self.encryptor.decrypt_json(&credential.encrypted_data)
    }

    /// List credentials (metadata only).
    pub async fn list(&self) -> AppResult<Vec<Credential>> {
        credential_queries::list(&self.db).await
    }

    /// Delete a credential by name.
    pub async fn delete(&self, name: &str) -> AppResult<()> {
        if !credential_queries::delete(&self.db, name).await? {
            return Err(AppError::NotFound(format!("Credential not found: {}", name)));
        }
        Ok(())
    }
}
