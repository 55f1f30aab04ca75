//! The process-wide service registry.
//!
//! Every service is published under a fixed name with a factory.  Nothing
//! is constructed at registration; the first member access on a name runs
//! its factory exactly once and all later accesses reuse the instance.
//!
//! Descriptors live in a [`DashMap`] as `Arc`s.  Construction clones the
//! `Arc` out first and then takes the descriptor's own slot lock, so a
//! factory never runs while a map shard is locked and concurrent first
//! touches of one name converge on a single instance.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use appvirt_kernel::{ServiceRegistry, factory};
//! # use appvirt_sandbox::SandboxEngine;
//! # use appvirt_store::FingerprintCache;
//! let registry = ServiceRegistry::new(
//!     Arc::new(SandboxEngine::default()),
//!     Arc::new(FingerprintCache::default()),
//! );
//! registry
//!     .register("Broken", factory(|| Err("no credentials".into())))
//!     .unwrap();
//!
//! assert_eq!(registry.registered(), vec!["Broken"]);
//! assert!(registry.loaded().is_empty());
//! assert!(registry.instance("Broken").is_err());
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use appvirt_sandbox::{SandboxEngine, TrashReport};
use appvirt_store::FingerprintCache;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use crate::dispatch::ServiceHandle;
use crate::error::{KernelError, Result};
use crate::service::{PRIVATE_PREFIX, Service, ServiceFactory};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// One registered service name.
pub(crate) struct ServiceDescriptor {
    pub(crate) name: String,
    factory: ServiceFactory,
    instance: Mutex<Option<Arc<dyn Service>>>,
    /// Values written to private (`__`-prefixed) properties.
    pub(crate) private: DashMap<String, Value>,
    registered_at: DateTime<Utc>,
}

impl ServiceDescriptor {
    fn new(name: String, factory: ServiceFactory) -> Self {
        Self {
            name,
            factory,
            instance: Mutex::new(None),
            private: DashMap::new(),
            registered_at: Utc::now(),
        }
    }

    fn same_factory(&self, other: &ServiceFactory) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.factory), Arc::as_ptr(other))
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The instance, constructing it on first use.
    ///
    /// A failing factory leaves the slot empty so the next call retries.
    pub(crate) fn resolve(&self) -> Result<Arc<dyn Service>> {
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }

        match (self.factory)() {
            Ok(instance) => {
                tracing::info!(
                    service = %self.name,
                    since_registration_ms = (Utc::now() - self.registered_at).num_milliseconds(),
                    "service constructed"
                );
                *slot = Some(Arc::clone(&instance));
                Ok(instance)
            }
            Err(e) => {
                tracing::warn!(service = %self.name, error = %e, "service construction failed");
                Err(KernelError::Construction {
                    service: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryInner {
    descriptors: DashMap<String, Arc<ServiceDescriptor>>,
    sandbox: Arc<SandboxEngine>,
    cache: Arc<FingerprintCache>,
}

/// Lazy, sandboxed service registry.
///
/// The registry is cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Create an empty registry gated by `sandbox` and memoizing reads in
    /// `cache`.
    pub fn new(sandbox: Arc<SandboxEngine>, cache: Arc<FingerprintCache>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                descriptors: DashMap::new(),
                sandbox,
                cache,
            }),
        }
    }

    /// Publish `name`.
    ///
    /// Registering the same factory again is a no-op; registering a
    /// different one under a taken name is a [`KernelError::Misuse`].
    pub fn register(&self, name: impl Into<String>, factory: ServiceFactory) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.starts_with(PRIVATE_PREFIX) {
            return Err(KernelError::misuse(format!(
                "`{name}` is not a valid service name"
            )));
        }

        match self.inner.descriptors.entry(name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().same_factory(&factory) {
                    tracing::debug!(service = %name, "service re-registered with same factory");
                    Ok(())
                } else {
                    Err(KernelError::misuse(format!(
                        "service `{name}` is already registered with a different factory"
                    )))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ServiceDescriptor::new(name.clone(), factory)));
                tracing::info!(service = %name, "service registered");
                Ok(())
            }
        }
    }

    /// Whether `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.descriptors.contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .descriptors
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Names whose instance has been constructed, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .descriptors
            .iter()
            .filter(|e| e.value().is_loaded())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn descriptor(&self, name: &str) -> Result<Arc<ServiceDescriptor>> {
        self.inner
            .descriptors
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| KernelError::ServiceNotFound {
                service: name.to_string(),
            })
    }

    /// The published handle for `name`.  Does not construct anything.
    pub fn service(&self, name: &str) -> Result<ServiceHandle> {
        Ok(ServiceHandle::new(self.clone(), self.descriptor(name)?))
    }

    /// The constructed instance behind `name`, bypassing the sandbox.
    pub fn instance(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.descriptor(name)?.resolve()
    }

    pub fn sandbox(&self) -> &Arc<SandboxEngine> {
        &self.inner.sandbox
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.inner.cache
    }

    /// Best-effort teardown of every session resource.
    ///
    /// Each resource is trashed through its owning service, outside the
    /// sandbox, and its cache scope dropped.
    pub fn trash(&self) -> TrashReport {
        self.inner.sandbox.trash(|resource| {
            let service = self.instance(&resource.service)?;
            self.inner.cache.invalidate_scope(&resource.id);
            service
                .trash_resource(resource)
                .map_err(|source| KernelError::Call {
                    service: resource.service.clone(),
                    method: "trash".to_string(),
                    source,
                })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
