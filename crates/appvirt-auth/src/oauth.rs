//! OAuth 2.0 refresh-token grant.
//!
//! Services run unattended, so the only flow needed at runtime is exchanging
//! a long-lived refresh token for a short-lived access token (RFC 6749
//! section 6).  Obtaining the refresh token in the first place is done out
//! of band.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Seconds before the real expiry at which a token is treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Credentials for the refresh-token grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The OAuth client secret (confidential clients only).
    pub client_secret: Option<String>,

    /// The long-lived refresh token.
    pub refresh_token: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// The scopes to request.  Empty means whatever the grant carried.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Check that every required field is present and the token URL parses.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: "missing client_id".to_string(),
            });
        }
        if self.refresh_token.is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: "missing refresh_token".to_string(),
            });
        }
        Url::parse(&self.token_url)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

/// An access token and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The bearer token.
    pub token: String,

    /// Unix timestamp (seconds) when the token expires.
    pub expires_at: Option<i64>,

    /// The token type (typically "Bearer").
    pub token_type: String,

    /// The scopes that were granted.
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// A token with no expiry information.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
            token_type: "Bearer".to_string(),
            scopes: Vec::new(),
        }
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the token is expired or about to expire.
    ///
    /// Tokens are treated as expired [`EXPIRY_MARGIN_SECS`] early so a token
    /// never lapses mid-request.  No expiry information means valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at - EXPIRY_MARGIN_SECS,
            None => false,
        }
    }
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    /// Convert into an [`AccessToken`], computing `expires_at` from
    /// `expires_in`.
    fn into_token(self) -> AccessToken {
        let expires_at = self
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        AccessToken {
            token: self.access_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scopes,
        }
    }
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Performs refresh-token grants against one token endpoint.
pub struct OAuthClient {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Exchange the configured refresh token for a fresh access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] if the refresh token is invalid or
    /// revoked, or [`AuthError::Network`] on transport failure.
    pub async fn refresh(&self) -> Result<AccessToken> {
        let scope = self.config.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];

        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        tracing::debug!(token_url = %self.config.token_url, "refreshing access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        Self::parse_token_response(response).await
    }

    /// Parse the HTTP response from the token endpoint.
    async fn parse_token_response(response: reqwest::Response) -> Result<AccessToken> {
        let status = response.status();

        if status.is_success() {
            let token_response: TokenResponse = response.json().await?;
            tracing::debug!("token refresh successful");
            Ok(token_response.into_token())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::InvalidGrant {
                reason: grant_error_reason(status, &body),
            })
        }
    }
}

/// Best description of a failed grant: the server's OAuth error if the
/// body is one, the raw status and body otherwise.
fn grant_error_reason(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error) => error.error_description.unwrap_or(error.error),
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
