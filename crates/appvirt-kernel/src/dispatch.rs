//! Sandboxed member access.
//!
//! A [`ServiceHandle`] is what calling code sees under a published name.
//! Reading a member resolves the service (constructing it on first touch),
//! checks methods against the sandbox and hands back a [`BoundMethod`].
//! Calling a bound method runs the full sandbox check sequence, consults the
//! fingerprint cache for scoped reads, invokes the service, invalidates the
//! scope after mutations and records created resources.

use std::sync::Arc;

use appvirt_sandbox::{CallCheck, ResourceRef, SandboxEngine};
use appvirt_store::FingerprintCache;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{KernelError, Result};
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::service::{
    MARKER_IS_VIRTUALIZED, MARKER_LOADED, MARKER_REGISTERED, MethodKind, MethodSpec,
    PRIVATE_PREFIX, RESERVED_MARKERS, Service,
};

/// The result of reading a member.
pub enum Member {
    /// A reserved introspection marker.  Never constructs the service.
    Marker(Value),
    /// A plain value: a declared property or a private property.
    Value(Value),
    /// A callable method, already past the service and method checks.
    Method(BoundMethod),
}

impl Member {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Marker(v) | Self::Value(v) => Some(v),
            Self::Method(_) => None,
        }
    }

    pub fn into_method(self) -> Option<BoundMethod> {
        match self {
            Self::Method(m) => Some(m),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Marker(v) => f.debug_tuple("Marker").field(v).finish(),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Method(m) => f.debug_tuple("Method").field(&m.spec.name).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// The published face of one service.
#[derive(Clone)]
pub struct ServiceHandle {
    registry: ServiceRegistry,
    descriptor: Arc<ServiceDescriptor>,
}

impl ServiceHandle {
    pub(crate) fn new(registry: ServiceRegistry, descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            registry,
            descriptor,
        }
    }

    /// The published name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Whether the service has been constructed.
    pub fn is_loaded(&self) -> bool {
        self.descriptor.is_loaded()
    }

    fn marker(&self, member: &str) -> Option<Value> {
        match member {
            MARKER_IS_VIRTUALIZED => Some(Value::Bool(true)),
            MARKER_REGISTERED => Some(json!(self.registry.registered())),
            MARKER_LOADED => Some(json!(self.registry.loaded())),
            _ => None,
        }
    }

    /// Read member `member`.
    pub fn get(&self, member: &str) -> Result<Member> {
        if let Some(value) = self.marker(member) {
            return Ok(Member::Marker(value));
        }
        if let Some(value) = self.descriptor.private.get(member) {
            return Ok(Member::Value(value.value().clone()));
        }

        let service = self.descriptor.resolve()?;
        let manifest = service.manifest();

        if let Some(spec) = manifest.method(member) {
            self.registry.sandbox().check_method(self.name(), member)?;
            return Ok(Member::Method(BoundMethod {
                service: Arc::clone(&service),
                spec: spec.clone(),
                sandbox: Arc::clone(self.registry.sandbox()),
                cache: Arc::clone(self.registry.cache()),
            }));
        }

        if manifest.has_property(member) {
            return Ok(Member::Value(service.property(member).unwrap_or(Value::Null)));
        }

        Err(KernelError::MemberNotFound {
            service: self.name().to_string(),
            member: member.to_string(),
        })
    }

    /// Write member `member`.  Only private (`__`-prefixed) names that are
    /// not reserved markers may be written.
    pub fn set(&self, member: &str, value: Value) -> Result<()> {
        if !member.starts_with(PRIVATE_PREFIX) || RESERVED_MARKERS.contains(&member) {
            return Err(KernelError::misuse(format!(
                "cannot assign `{}.{member}`: only private `{PRIVATE_PREFIX}` properties are writable",
                self.name()
            )));
        }
        self.descriptor.private.insert(member.to_string(), value);
        debug!(service = %self.name(), member, "private property written");
        Ok(())
    }

    /// Every public member across the manifest chain, followed by any
    /// private properties that were written.
    pub fn members(&self) -> Result<Vec<String>> {
        let service = self.descriptor.resolve()?;
        let mut names = service.manifest().members();
        let mut private: Vec<String> = self
            .descriptor
            .private
            .iter()
            .map(|e| e.key().clone())
            .collect();
        private.sort();
        names.extend(private);
        Ok(names)
    }

    /// Read `method` and call it with `args`.
    pub fn call(&self, method: &str, args: Value) -> Result<Value> {
        match self.get(method)? {
            Member::Method(bound) => bound.call(args),
            _ => Err(KernelError::misuse(format!(
                "`{}.{method}` is not callable",
                self.name()
            ))),
        }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Bound method
// ---------------------------------------------------------------------------

/// A method resolved against a constructed service.
#[derive(Clone)]
pub struct BoundMethod {
    service: Arc<dyn Service>,
    spec: MethodSpec,
    sandbox: Arc<SandboxEngine>,
    cache: Arc<FingerprintCache>,
}

impl BoundMethod {
    pub fn spec(&self) -> &MethodSpec {
        &self.spec
    }

    fn resource(&self, args: &Value) -> Option<ResourceRef> {
        let id = self.spec.resource_id(args)?;
        let mut resource = ResourceRef::new(id);
        // Names only matter when rules will be consulted.
        if self.sandbox.is_strict() && !self.sandbox.session().contains(id) {
            if let Some(name) = self.service.resource_name(id) {
                resource = resource.with_name(name);
            }
        }
        Some(resource)
    }

    /// Run the method.
    pub fn call(&self, args: Value) -> Result<Value> {
        let service = self.service.name();
        let method = self.spec.name.as_str();

        // A refused method never reaches the service, not even for a name.
        self.sandbox.check_method(service, method)?;
        let resource = self
            .spec
            .kind
            .op_kind()
            .and_then(|_| self.resource(&args));

        self.sandbox.authorize(&CallCheck {
            service,
            method,
            kind: self.spec.kind.op_kind(),
            resource: resource.as_ref(),
        })?;

        let scope = self.spec.scope(&args).map(str::to_string);
        let cache_key = json!({ "method": method, "args": &args });

        if self.spec.kind == MethodKind::Read {
            if let Some(scope) = scope.as_deref() {
                if let Some(hit) = self.cache.get(scope, &cache_key) {
                    return Ok(hit);
                }
            }
        }

        let outcome = self.service.invoke(method, &args);

        if self.spec.kind.is_mutating() {
            if let Some(scope) = scope.as_deref() {
                self.cache.invalidate_scope(scope);
            }
        }

        let value = outcome.map_err(|source| KernelError::Call {
            service: service.to_string(),
            method: method.to_string(),
            source,
        })?;

        match self.spec.kind {
            MethodKind::Create => {
                match value
                    .get(&self.spec.created_id_field)
                    .and_then(Value::as_str)
                {
                    Some(id) => self.sandbox.track_created(service, id, &self.spec.created_kind),
                    None => tracing::warn!(
                        service,
                        method,
                        field = %self.spec.created_id_field,
                        "create result carries no id; resource not tracked"
                    ),
                }
            }
            MethodKind::Read => {
                if let Some(scope) = scope.as_deref() {
                    self.cache.put(scope, &cache_key, value.clone());
                }
            }
            _ => {}
        }

        Ok(value)
    }
}

impl std::fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundMethod")
            .field("service", &self.service.name())
            .field("spec", &self.spec)
            .finish()
    }
}
