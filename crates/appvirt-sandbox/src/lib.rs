//! Appvirt sandbox behavior engine.
//!
//! Gates every virtualized service call behind per-service permissions and
//! quotas, and keeps track of the resources the current process created so
//! they can be accessed freely and torn down at the end of a session.
//!
//! - **[`config`]** -- [`SandboxSettings`] per service, [`SandboxConfig`] as
//!   the process-wide seed, plus [`ResourceRule`], [`UsageLimit`] and
//!   [`OpKind`].
//! - **[`session`]** -- [`SessionResources`], the set of resources minted in
//!   this run.
//! - **[`engine`]** -- [`SandboxEngine`] runs the ordered checks and session
//!   teardown.
//! - **[`error`]** -- [`SandboxError`] enumerates every denial.
//!
//! All public types are `Send + Sync`.

pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use config::{OpKind, ResourceRule, SandboxConfig, SandboxSettings, UsageLimit};
pub use engine::{CallCheck, ResourceRef, SandboxEngine, TrashFailure, TrashReport};
pub use error::{DenialReason, LimitScope, Result, SandboxError};
pub use session::{SessionResource, SessionResources};
