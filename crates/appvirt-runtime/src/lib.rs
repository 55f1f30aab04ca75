//! Appvirt runtime: configuration, assembly and the process-wide instance.
//!
//! ```no_run
//! use serde_json::json;
//!
//! appvirt_runtime::init_tracing("info");
//! let runtime = appvirt_runtime::init(appvirt_runtime::RuntimeConfig::load()?)?;
//! let drive = runtime.service("Drive")?;
//! let file = drive.call("createFile", json!({ "name": "notes.txt" }))?;
//! println!("{}", file["id"]);
//! runtime.trash();
//! # Ok::<(), appvirt_runtime::RuntimeError>(())
//! ```

pub mod config;
pub mod error;
pub mod runtime;
pub mod telemetry;

pub use config::{AuthSettings, PropertiesSettings, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use runtime::{Runtime, global, init};
pub use telemetry::init_tracing;
