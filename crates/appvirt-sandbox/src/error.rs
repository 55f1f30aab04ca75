//! Sandbox error types.
//!
//! Every variant is a deterministic, pre-execution denial: when one of these
//! is returned the underlying service call was never attempted and no usage
//! counter was incremented.

use std::fmt;

use crate::config::OpKind;

/// Why a resource access check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// At least one rule matched the resource but none grants the capability.
    Denied,
    /// No rule in the resource whitelist matches the resource.
    NoMatchingRule,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => f.write_str("denied by resource rule"),
            Self::NoMatchingRule => f.write_str("no matching resource rule"),
        }
    }
}

/// Which limit a usage check tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// A scalar limit on the sum of all operation kinds.
    Total,
    /// A limit on one operation kind.
    Kind(OpKind),
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => f.write_str("total"),
            Self::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

/// Unified error type for sandbox policy violations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The whole service is switched off.
    #[error("service `{service}` is disabled by the sandbox")]
    ServiceDisabled { service: String },

    /// The method is absent from the service's method whitelist.
    #[error("method `{service}.{method}` is not in the sandbox method whitelist")]
    MethodNotAllowed { service: String, method: String },

    /// The target resource is neither a session resource nor granted the
    /// requested capability by a resource rule.
    #[error("{capability} access to resource `{resource}` via `{service}.{method}` refused: {reason}")]
    AccessDenied {
        service: String,
        method: String,
        resource: String,
        capability: OpKind,
        reason: DenialReason,
    },

    /// Performing the call would exceed the configured usage limit.
    #[error("usage limit exceeded for `{service}.{method}`: {scope} usage {used} has reached limit {limit}")]
    UsageLimitExceeded {
        service: String,
        method: String,
        kind: OpKind,
        scope: LimitScope,
        used: u64,
        limit: u64,
    },
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
