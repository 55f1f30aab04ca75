//! Credential errors.
//!
//! Variants separate "nothing to hand out" from "the server said no" so a
//! caller can tell a misconfiguration from a revoked grant.

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token source has no usable token and cannot obtain one.
    #[error("token source `{source_name}` has no access token: {reason}")]
    TokenUnavailable { source_name: String, reason: String },

    /// The authorization server rejected the refresh grant.
    #[error("refresh grant rejected: {reason}")]
    InvalidGrant { reason: String },

    /// The token endpoint could not be reached or answered garbage.
    #[error("token endpoint request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Credentials are incomplete.
    #[error("incomplete credentials: {reason}")]
    InvalidConfig { reason: String },

    /// The token endpoint is not a URL.
    #[error("token url: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
