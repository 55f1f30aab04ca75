//! Bridge error types.
//!
//! Everything that can go wrong between handing a unit of work to the
//! bridge and getting its result back.  These are the transport errors the
//! service layer surfaces verbatim to callers.

use std::time::Duration;

/// Boxed error produced by a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for the synchronous bridge and its transports.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The worker runtime could not be started.
    #[error("failed to start bridge runtime: {reason}")]
    Startup { reason: String },

    /// The bridge was called from one of its own worker threads; blocking
    /// there would deadlock.
    #[error("unit `{label}` was submitted from inside a bridge worker")]
    Reentrant { label: String },

    /// The unit did not finish within the configured timeout.
    #[error("unit `{label}` timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    /// The unit panicked or was dropped before producing a result.
    #[error("unit `{label}` was abandoned before completing")]
    Abandoned { label: String },

    /// The unit ran to completion and reported an error.
    #[error("unit `{label}` failed: {source}")]
    Unit {
        label: String,
        #[source]
        source: BoxError,
    },

    /// An HTTP request could not be performed.
    #[error("http request to `{url}` failed: {reason}")]
    Http { url: String, reason: String },

    /// A request was rejected before being sent.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl BridgeError {
    /// Wrap a unit-of-work error.
    pub fn unit(label: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unit {
            label: label.into(),
            source: source.into(),
        }
    }
}

/// Convenience alias used throughout the bridge crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
