//! Cached access tokens.
//!
//! [`TokenManager`] hands out the current access token, going back to its
//! [`TokenSource`] only when there is no token yet, the token is within the
//! expiry margin, or a caller invalidated it (typically after a 401).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::error::Result;
use crate::oauth::AccessToken;
use crate::source::TokenSource;

/// Caches the token of one [`TokenSource`].
pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    current: Mutex<Option<AccessToken>>,
    fetches: AtomicU64,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Name of the underlying source.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// A valid access token, fetching a new one if needed.
    ///
    /// Concurrent callers wait on the same lock, so an expired token is
    /// refreshed once rather than once per caller.
    pub async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.token.clone());
        }

        tracing::debug!(source = self.source.name(), "fetching access token");
        let token = self.source.fetch_token().await.inspect_err(|e| {
            tracing::warn!(source = self.source.name(), error = %e, "token fetch failed");
        })?;
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let value = token.token.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
        tracing::debug!(source = self.source.name(), "access token invalidated");
    }

    /// How many times the source was asked for a token.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
