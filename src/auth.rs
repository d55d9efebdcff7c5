//! Credential resolution seam.
//!
//! Credential issuance and refresh live outside the gateway; the manager and
//! its shards only consume this trait. The login identity is resolved once
//! when a manager is set up, and a fresh token is resolved on every connect
//! so refreshed credentials are picked up across reconnects.

use async_trait::async_trait;
use thiserror::Error;

/// A resolved login/token pair for one connection.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name the shard signs in as.
    pub login: String,
    /// Bearer token for that account. Never logged.
    pub token: String,
}

/// Credential resolution failure.
///
/// Any variant is terminal for the shard that hit it: the gateway does not
/// retry authentication on its own.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// The provider has no credentials for the requested identity.
    #[error("no token available for {login:?}")]
    NoTokenAvailable { login: Option<String> },

    /// The server or provider rejected the presented credentials.
    #[error("credentials rejected: {reason}")]
    Rejected { reason: String },
}

impl AuthError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Resolves credentials for shard connections.
///
/// `channel` is an optional hint for providers that scope tokens per channel;
/// the bundled policies always pass `None`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, channel: Option<&str>) -> Result<Credentials, AuthError>;
}

/// Provider backed by one fixed login/token pair.
///
/// Suitable for single-account deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(login: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials {
                login: login.into(),
                token: token.into(),
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, _channel: Option<&str>) -> Result<Credentials, AuthError> {
        Ok(self.credentials.clone())
    }
}
