//! Where access tokens come from.

use async_trait::async_trait;

use crate::error::{AuthError, Result};
use crate::oauth::{AccessToken, OAuthClient, OAuthConfig};

/// A provider of access tokens.
///
/// Implementations perform the actual acquisition; caching and expiry
/// handling live in [`crate::TokenManager`].
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Obtain a fresh token.
    async fn fetch_token(&self) -> Result<AccessToken>;
}

// ---------------------------------------------------------------------------
// Static token
// ---------------------------------------------------------------------------

/// A fixed token supplied by configuration, e.g. from `gcloud auth
/// print-access-token`.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        if self.token.trim().is_empty() {
            return Err(AuthError::TokenUnavailable {
                source_name: self.name().to_string(),
                reason: "configured token is empty".to_string(),
            });
        }
        Ok(AccessToken::bearer(self.token.clone()))
    }
}

// ---------------------------------------------------------------------------
// Refresh token
// ---------------------------------------------------------------------------

/// Mints access tokens from a long-lived OAuth refresh token.
pub struct RefreshTokenSource {
    client: OAuthClient,
}

impl RefreshTokenSource {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        Ok(Self {
            client: OAuthClient::new(config)?,
        })
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    fn name(&self) -> &str {
        "refresh_token"
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        self.client.refresh().await
    }
}
