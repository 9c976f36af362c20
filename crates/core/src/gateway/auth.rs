//! Credential seam for the gateway. Token issuance and refresh belong to an
//! external auth collaborator; the gateway only asks for a bearer token and,
//! after a 401, for exactly one refresh.

use async_trait::async_trait;

use super::error::{GatewayError, Result};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token
    async fn token(&self) -> Result<String>;

    /// Obtain a fresh token after the backend rejected the current one.
    /// An error here ends the session.
    async fn refresh(&self) -> Result<String>;
}

/// Fixed token, e.g. from `LEADFLOW_API_TOKEN`. Cannot be refreshed.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<String> {
        Err(GatewayError::AuthExpired(
            "static credentials cannot be refreshed".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new("tok-123");
        assert_eq!(tokio_test::block_on(creds.token()).unwrap(), "tok-123");

        let err = tokio_test::block_on(creds.refresh()).unwrap_err();
        assert!(err.is_auth_expired());
        assert!(!format!("{:?}", creds).contains("tok-123"));
    }
}
