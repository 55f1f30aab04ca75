//! Runtime error types.

use std::path::PathBuf;

use appvirt_auth::AuthError;
use appvirt_bridge::BridgeError;
use appvirt_kernel::KernelError;
use appvirt_store::StoreError;

/// Errors raised while loading configuration or assembling the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A configuration value is missing or malformed.
    #[error("invalid configuration for `{key}`: {reason}")]
    Config { key: String, reason: String },

    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process-wide runtime was already published.
    #[error("the global runtime is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

impl RuntimeError {
    pub(crate) fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
