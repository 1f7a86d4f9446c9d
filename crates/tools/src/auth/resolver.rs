//! Authentication resolver.
//!
//! Resolves authentication configuration to credential material. Credential
//! references are materialized into the execution context's secret map by
//! the dispatcher before the resolver runs; the resolver itself never talks
//! to the credential store.

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::registry::{AuthConfig, AuthType};

/// Resolved authentication credentials.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// Bearer token.
    Bearer(String),
    /// Basic auth (username, password).
    Basic(String, String),
    /// API key (header name, value).
    ApiKey(String, String),
    /// No authentication.
    None,
}

impl AuthCredentials {
    /// Apply credentials to a reqwest request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthCredentials::Bearer(token) => request.bearer_auth(token),
            AuthCredentials::Basic(username, password) => {
                request.basic_auth(username, Some(password))
            }
            AuthCredentials::ApiKey(header, value) => {
                request.header(header.as_str(), value.as_str())
            }
            AuthCredentials::None => request,
        }
    }
}

/// Authentication resolver.
#[derive(Debug, Default)]
pub struct AuthResolver;

impl AuthResolver {
    /// Create a new auth resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve authentication configuration to credentials.
    pub fn resolve(
        &self,
        config: &AuthConfig,
        ctx: &ExecutionContext,
    ) -> Result<AuthCredentials, ToolError> {
        match config.auth_type {
            AuthType::Bearer => self.resolve_bearer(config, ctx),
            AuthType::Basic => self.resolve_basic(config, ctx),
            AuthType::ApiKey => self.resolve_api_key(config, ctx),
            AuthType::None => Ok(AuthCredentials::None),
        }
    }

    fn resolve_bearer(
        &self,
        config: &AuthConfig,
        ctx: &ExecutionContext,
    ) -> Result<AuthCredentials, ToolError> {
        // Direct token takes precedence
        if let Some(ref token) = config.token {
            return Ok(AuthCredentials::Bearer(token.clone()));
        }

        if let Some(ref credential) = config.credential {
            if let Some(token) = ctx.get_secret(credential) {
                return Ok(AuthCredentials::Bearer(token.to_string()));
            }
            return Err(ToolError::Auth(format!(
                "Credential '{}' not found in context",
                credential
            )));
        }

        Err(ToolError::Auth(
            "Bearer auth requires 'token' or 'credential'".to_string(),
        ))
    }

    fn resolve_basic(
        &self,
        config: &AuthConfig,
        ctx: &ExecutionContext,
    ) -> Result<AuthCredentials, ToolError> {
        let password = if let Some(ref credential) = config.credential {
            ctx.get_secret(credential)
                .ok_or_else(|| {
                    ToolError::Auth(format!("Credential '{}' not found in context", credential))
                })?
                .to_string()
        } else {
            config
                .password
                .clone()
                .ok_or_else(|| ToolError::Auth("Basic auth requires 'password'".to_string()))?
        };

        let username = config
            .username
            .clone()
            .ok_or_else(|| ToolError::Auth("Basic auth requires 'username'".to_string()))?;

        Ok(AuthCredentials::Basic(username, password))
    }

    fn resolve_api_key(
        &self,
        config: &AuthConfig,
        ctx: &ExecutionContext,
    ) -> Result<AuthCredentials, ToolError> {
        let header = config
            .header
            .clone()
            .unwrap_or_else(|| "X-API-Key".to_string());

        let value = if let Some(ref credential) = config.credential {
            ctx.get_secret(credential)
                .ok_or_else(|| {
                    ToolError::Auth(format!("Credential '{}' not found in context", credential))
                })?
                .to_string()
        } else if let Some(ref token) = config.token {
            token.clone()
        } else {
            return Err(ToolError::Auth(
                "API key auth requires 'token' or 'credential'".to_string(),
            ));
        };

        Ok(AuthCredentials::ApiKey(header, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(auth_type: AuthType) -> AuthConfig {
        AuthConfig {
            auth_type,
            credential: None,
            token: None,
            username: None,
            password: None,
            header: None,
        }
    }

    #[test]
    fn test_resolve_none() {
        let resolver = AuthResolver::new();
        let ctx = ExecutionContext::default();
        let creds = resolver.resolve(&auth_config(AuthType::None), &ctx).unwrap();
        assert!(matches!(creds, AuthCredentials::None));
    }

    #[test]
    fn test_resolve_bearer_direct_token() {
        let resolver = AuthResolver::new();
        let ctx = ExecutionContext::default();
        let mut config = auth_config(AuthType::Bearer);
        config.token = Some("tok-123".to_string());

        let creds = resolver.resolve(&config, &ctx).unwrap();
        assert!(matches!(creds, AuthCredentials::Bearer(t) if t == "tok-123"));
    }

    #[test]
    fn test_resolve_bearer_from_credential() {
        let resolver = AuthResolver::new();
        let mut ctx = ExecutionContext::default();
        ctx.set_secret("api_token", "resolved-token");

        let mut config = auth_config(AuthType::Bearer);
        config.credential = Some("api_token".to_string());

        let creds = resolver.resolve(&config, &ctx).unwrap();
        assert!(matches!(creds, AuthCredentials::Bearer(t) if t == "resolved-token"));
    }

    #[test]
    fn test_resolve_bearer_missing_credential() {
        let resolver = AuthResolver::new();
        let ctx = ExecutionContext::default();
        let mut config = auth_config(AuthType::Bearer);
        config.credential = Some("absent".to_string());

        let result = resolver.resolve(&config, &ctx);
        assert!(matches!(result, Err(ToolError::Auth(_))));
    }

    #[test]
    fn test_resolve_basic() {
        let resolver = AuthResolver::new();
        let ctx = ExecutionContext::default();
        let mut config = auth_config(AuthType::Basic);
        config.username = Some("user".to_string());
        config.password = Some("pass".to_string());

        let creds = resolver.resolve(&config, &ctx).unwrap();
        assert!(matches!(creds, AuthCredentials::Basic(u, p) if u == "user" && p == "pass"));
    }

    #[test]
    fn test_resolve_api_key_default_header() {
        let resolver = AuthResolver::new();
        let ctx = ExecutionContext::default();
        let mut config = auth_config(AuthType::ApiKey);
        config.token = Some("key-1".to_string());

        let creds = resolver.resolve(&config, &ctx).unwrap();
        assert!(matches!(creds, AuthCredentials::ApiKey(h, v) if h == "X-API-Key" && v == "key-1"));
    }
}
