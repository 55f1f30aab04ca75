//! Credentials for appvirt services.
//!
//! Services talking to live cloud APIs need a bearer token.  This crate
//! supplies one from either a fixed configured token or an OAuth 2.0
//! refresh-token grant, and caches it until shortly before it expires.
//!
//! # Architecture
//!
//! ```text
//! TokenManager            (cache + expiry margin + invalidate)
//! └── dyn TokenSource
//!     ├── StaticTokenSource   (APPVIRT_ACCESS_TOKEN)
//!     └── RefreshTokenSource  (OAuthClient refresh grant)
//! ```

pub mod error;
pub mod manager;
pub mod oauth;
pub mod source;

pub use error::{AuthError, Result};
pub use manager::TokenManager;
pub use oauth::{AccessToken, EXPIRY_MARGIN_SECS, OAuthClient, OAuthConfig};
pub use source::{RefreshTokenSource, StaticTokenSource, TokenSource};
