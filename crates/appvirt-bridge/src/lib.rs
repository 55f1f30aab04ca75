//! Appvirt synchronous bridge.
//!
//! Presents inherently asynchronous work (network calls, token exchange,
//! property storage) to service code as ordinary blocking calls.
//!
//! - **[`bridge`]** -- [`SyncBridge`] runs one unit of work on a dedicated
//!   tokio runtime and blocks the caller until it resolves.
//! - **[`fetch`]** -- [`HttpTransport`] performs authenticated HTTP requests
//!   through the bridge.
//! - **[`error`]** -- [`BridgeError`] covers every transport failure.

pub mod bridge;
pub mod error;
pub mod fetch;

pub use bridge::{BridgeConfig, SyncBridge};
pub use error::{BoxError, BridgeError, Result};
pub use fetch::{FetchRequest, FetchResponse, HttpTransport};
