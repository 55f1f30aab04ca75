//! Kernel error types.
//!
//! Every public API in this crate returns [`KernelError`].  Sandbox denials
//! and service failures are wrapped, not flattened, so callers can match on
//! the precise cause.

use appvirt_bridge::BridgeError;
use appvirt_sandbox::SandboxError;

/// Failure reported by a service implementation.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The arguments did not have the shape the method expects.
    #[error("invalid arguments for `{method}`: {reason}")]
    InvalidArguments { method: String, reason: String },

    /// The targeted resource does not exist.
    #[error("{kind} `{id}` not found")]
    NotFound { kind: String, id: String },

    /// The method exists in the manifest but the service does not
    /// implement it.
    #[error("`{method}` is not supported")]
    Unsupported { method: String },

    /// The unit of work behind the call failed in transit.
    #[error(transparent)]
    Transport(#[from] BridgeError),

    /// The backing API reported a failure.
    #[error("backend error: {reason}")]
    Backend { reason: String },
}

impl CallError {
    pub fn invalid_args(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Unified error type for the appvirt kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// The caller violated the registry contract.
    #[error("misuse: {reason}")]
    Misuse { reason: String },

    /// No service is registered under this name.
    #[error("service not registered: {service}")]
    ServiceNotFound { service: String },

    /// The service factory failed.  The service stays unloaded and the next
    /// access retries construction.
    #[error("failed to construct service `{service}`: {reason}")]
    Construction { service: String, reason: String },

    // -- Dispatch errors ----------------------------------------------------
    /// The service has no member with this name.
    #[error("`{service}` has no member `{member}`")]
    MemberNotFound { service: String, member: String },

    /// A sandbox check refused the call; the service was never invoked.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The service ran and failed.
    #[error("`{service}.{method}` failed: {source}")]
    Call {
        service: String,
        method: String,
        #[source]
        source: CallError,
    },
}

impl KernelError {
    pub(crate) fn misuse(reason: impl Into<String>) -> Self {
        Self::Misuse {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_names_service_and_method() {
        let err = KernelError::Call {
            service: "Drive".into(),
            method: "getFileById".into(),
            source: CallError::not_found("file", "abc"),
        };
        assert_eq!(
            err.to_string(),
            "`Drive.getFileById` failed: file `abc` not found"
        );
    }

    #[test]
    fn sandbox_errors_pass_through() {
        let err: KernelError = SandboxError::ServiceDisabled {
            service: "Gmail".into(),
        }
        .into();
        assert_eq!(err.to_string(), "service `Gmail` is disabled by the sandbox");
    }

    #[test]
    fn transport_errors_convert() {
        let err: CallError = BridgeError::Abandoned {
            label: "props.get".into(),
        }
        .into();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KernelError>();
        assert_send_sync::<CallError>();
    }
}
