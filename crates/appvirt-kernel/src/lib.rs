//! Appvirt kernel: the service registry and interception layer.
//!
//! Publishes virtualized services under fixed names, builds each one lazily
//! on first touch and routes every method call through the sandbox and the
//! fingerprint cache before it reaches the implementation.
//!
//! - **[`service`]** -- the [`Service`] trait, [`ServiceManifest`] and
//!   [`MethodSpec`] describing each callable member.
//! - **[`registry`]** -- [`ServiceRegistry`], lazy construction and teardown.
//! - **[`dispatch`]** -- [`ServiceHandle`] and [`BoundMethod`], the checked
//!   path from member access to invocation.
//! - **[`error`]** -- [`KernelError`] and [`CallError`].
//!
//! ```text
//! caller ──▶ ServiceHandle::get ──▶ resolve (factory, once)
//!                 │
//!                 ▼
//!           BoundMethod::call ──▶ SandboxEngine::authorize
//!                 │                     │ denied ─▶ KernelError::Sandbox
//!                 ▼
//!           FingerprintCache (scoped reads) ──▶ Service::invoke
//! ```

pub mod dispatch;
pub mod error;
pub mod registry;
pub mod service;

pub use dispatch::{BoundMethod, Member, ServiceHandle};
pub use error::{CallError, KernelError, Result};
pub use registry::ServiceRegistry;
pub use service::{
    MARKER_IS_VIRTUALIZED, MARKER_LOADED, MARKER_REGISTERED, MethodKind, MethodSpec,
    PRIVATE_PREFIX, Service, ServiceFactory, ServiceManifest, factory,
};
