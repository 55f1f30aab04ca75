//! The sandbox behavior engine.
//!
//! [`SandboxEngine`] owns one [`SandboxSettings`] per service plus the
//! process-wide [`SessionResources`].  Every service call is checked in a
//! fixed order before it may reach the real implementation:
//!
//! 1. service enable flag
//! 2. method whitelist
//! 3. resource access (skipped when strictness is off)
//! 4. usage quota (check-then-increment)
//!
//! Settings of different services are independent.  Each service's entry
//! lives in a [`DashMap`] shard, so the quota check and the counter
//! increment happen under the same entry lock and cannot be torn by a
//! concurrent caller.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{OpKind, SandboxConfig, SandboxSettings};
use crate::error::{DenialReason, Result, SandboxError};
use crate::session::{SessionResource, SessionResources};

// ---------------------------------------------------------------------------
// Call description
// ---------------------------------------------------------------------------

/// The resource a call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
    /// Display name, when the service can resolve one; rules may match it.
    pub name: Option<String>,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Everything the engine needs to judge one call.
#[derive(Debug, Clone)]
pub struct CallCheck<'a> {
    pub service: &'a str,
    pub method: &'a str,
    /// The operation kind, or `None` for local calls that neither touch a
    /// resource nor count against the quota.
    pub kind: Option<OpKind>,
    /// The targeted resource, if the call names one.
    pub resource: Option<&'a ResourceRef>,
}

// ---------------------------------------------------------------------------
// Teardown report
// ---------------------------------------------------------------------------

/// A session resource that could not be trashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashFailure {
    pub resource: SessionResource,
    pub reason: String,
}

/// Outcome of [`SandboxEngine::trash`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrashReport {
    /// Resources successfully trashed.
    pub trashed: Vec<SessionResource>,
    /// Resources whose trash attempt failed.
    pub failed: Vec<TrashFailure>,
    /// Services that opted out of cleanup; their resources are untouched
    /// and still tracked.
    pub skipped_services: Vec<String>,
}

impl TrashReport {
    /// Whether every attempted resource was trashed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-service permission and quota state.
pub struct SandboxEngine {
    seed: SandboxConfig,
    strict: AtomicBool,
    settings: DashMap<String, SandboxSettings>,
    session: SessionResources,
}

impl SandboxEngine {
    /// Create an engine seeded from `config`.
    pub fn new(config: SandboxConfig) -> Self {
        info!(
            strict = config.strict,
            seeded_services = config.services.len(),
            "sandbox engine created"
        );
        Self {
            strict: AtomicBool::new(config.strict),
            seed: config,
            settings: DashMap::new(),
            session: SessionResources::new(),
        }
    }

    // -- strictness ---------------------------------------------------------

    /// Whether resource access checks apply.
    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::SeqCst)
    }

    /// Toggle resource access checks.  Method, service and quota checks are
    /// unaffected.
    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::SeqCst);
        info!(strict, "sandbox strictness changed");
    }

    // -- settings -----------------------------------------------------------

    fn entry(&self, service: &str) -> RefMut<'_, String, SandboxSettings> {
        self.settings
            .entry(service.to_string())
            .or_insert_with(|| self.seed.seed_for(service))
    }

    /// Snapshot of the current settings of `service`.
    pub fn settings(&self, service: &str) -> SandboxSettings {
        self.entry(service).value().clone()
    }

    /// Mutate the settings of `service` in place.
    pub fn update<F>(&self, service: &str, f: F)
    where
        F: FnOnce(&mut SandboxSettings),
    {
        let mut entry = self.entry(service);
        f(entry.value_mut());
        debug!(service, "sandbox settings updated");
    }

    /// Replace the settings of `service` wholesale.
    pub fn replace(&self, service: &str, settings: SandboxSettings) {
        self.settings.insert(service.to_string(), settings);
        debug!(service, "sandbox settings replaced");
    }

    /// Zero the usage counters of `service`.
    pub fn reset_usage(&self, service: &str) {
        self.entry(service).usage_count.clear();
    }

    /// Restore `service` to its seeded settings with zeroed counters.
    pub fn reset(&self, service: &str) {
        self.settings.remove(service);
        debug!(service, "sandbox settings reset");
    }

    /// Restore every service and the strictness flag to their seeds.
    /// Session tracking is left alone; use [`Self::trash`] for that.
    pub fn reset_all(&self) {
        self.settings.clear();
        self.strict.store(self.seed.strict, Ordering::SeqCst);
        info!("sandbox settings reset to seed");
    }

    // -- checks -------------------------------------------------------------

    /// Steps 1 and 2: the service is enabled and the method is whitelisted.
    pub fn check_method(&self, service: &str, method: &str) -> Result<()> {
        let entry = self.entry(service);

        if !entry.enabled {
            warn!(service, method, "call refused: service disabled");
            return Err(SandboxError::ServiceDisabled {
                service: service.to_string(),
            });
        }

        if !entry.allows_method(method) {
            warn!(service, method, "call refused: method not whitelisted");
            return Err(SandboxError::MethodNotAllowed {
                service: service.to_string(),
                method: method.to_string(),
            });
        }

        Ok(())
    }

    /// Step 3: the caller may perform `capability` on `resource`.
    pub fn check_access(
        &self,
        service: &str,
        method: &str,
        resource: &ResourceRef,
        capability: OpKind,
    ) -> Result<()> {
        if !self.is_strict() || self.session.contains(&resource.id) {
            return Ok(());
        }

        let entry = self.entry(service);
        let mut matched = false;
        for rule in &entry.resource_whitelist {
            if rule.matches(&resource.id, resource.name.as_deref()) {
                if rule.allows(capability) {
                    return Ok(());
                }
                matched = true;
            }
        }

        let reason = if matched {
            DenialReason::Denied
        } else {
            DenialReason::NoMatchingRule
        };
        warn!(
            service,
            method,
            resource = %resource.id,
            capability = %capability,
            reason = %reason,
            "call refused: resource access"
        );
        Err(SandboxError::AccessDenied {
            service: service.to_string(),
            method: method.to_string(),
            resource: resource.id.clone(),
            capability,
            reason,
        })
    }

    /// Step 4: count one operation of `kind`, unless that would exceed the
    /// limit, in which case nothing is counted.
    pub fn consume(&self, service: &str, method: &str, kind: OpKind) -> Result<()> {
        let mut entry = self.entry(service);

        if let Some((scope, used, limit)) = entry.quota_exhausted(kind) {
            warn!(service, method, kind = %kind, used, limit, "call refused: usage limit");
            return Err(SandboxError::UsageLimitExceeded {
                service: service.to_string(),
                method: method.to_string(),
                kind,
                scope,
                used,
                limit,
            });
        }

        *entry.usage_count.entry(kind).or_insert(0) += 1;
        Ok(())
    }

    /// Run every check in order.  The first failing check wins.
    pub fn authorize(&self, call: &CallCheck<'_>) -> Result<()> {
        self.check_method(call.service, call.method)?;

        let Some(kind) = call.kind else {
            debug!(service = call.service, method = call.method, "local call allowed");
            return Ok(());
        };

        if let Some(resource) = call.resource {
            self.check_access(call.service, call.method, resource, kind)?;
        }

        self.consume(call.service, call.method, kind)?;

        debug!(
            service = call.service,
            method = call.method,
            kind = %kind,
            "call allowed"
        );
        Ok(())
    }

    // -- session ------------------------------------------------------------

    /// The set of resources created in this session.
    pub fn session(&self) -> &SessionResources {
        &self.session
    }

    /// Register a freshly created resource.
    pub fn track_created(&self, service: &str, id: &str, kind: &str) {
        self.session.track(service, id, kind);
    }

    /// Best-effort teardown of every session resource.
    ///
    /// Services whose settings have `cleanup == false` are skipped and keep
    /// their tracked resources.  For every other service each resource is
    /// handed to `trash_one`, newest first; a failure is logged and recorded
    /// and the pass continues.  Trashed resources stop being tracked; failed
    /// ones stay tracked, keeping their session access, so a later pass
    /// retries them.
    pub fn trash<F, E>(&self, mut trash_one: F) -> TrashReport
    where
        F: FnMut(&SessionResource) -> std::result::Result<(), E>,
        E: std::fmt::Display,
    {
        let mut report = TrashReport::default();

        for service in self.session.services() {
            if !self.entry(&service).cleanup {
                info!(service = %service, "teardown skipped: cleanup disabled");
                report.skipped_services.push(service);
                continue;
            }

            for resource in self.session.for_service(&service) {
                match trash_one(&resource) {
                    Ok(()) => {
                        debug!(service = %service, resource = %resource.id, "resource trashed");
                        self.session.untrack(&resource.id);
                        report.trashed.push(resource);
                    }
                    Err(err) => {
                        warn!(
                            service = %service,
                            resource = %resource.id,
                            error = %err,
                            "failed to trash session resource"
                        );
                        report.failed.push(TrashFailure {
                            resource,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            trashed = report.trashed.len(),
            failed = report.failed.len(),
            skipped_services = report.skipped_services.len(),
            "session teardown finished"
        );
        report
    }
}

impl Default for SandboxEngine {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
