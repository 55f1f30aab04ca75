//! The service abstraction.
//!
//! A service is one virtualized API surface (a drive, a property store, a
//! URL fetcher).  It declares its surface up front in a [`ServiceManifest`]
//! so the registry can enumerate members and classify every call without
//! runtime introspection.

use std::collections::HashSet;
use std::sync::Arc;

use appvirt_bridge::BoxError;
use appvirt_sandbox::{OpKind, SessionResource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallError;

/// Prefix of property names that callers may write and that are never part
/// of a service's public surface.
pub const PRIVATE_PREFIX: &str = "__";

/// Answers whether the accessed object is a virtualized service.
pub const MARKER_IS_VIRTUALIZED: &str = "__isVirtualized";
/// Lists every registered service name.
pub const MARKER_REGISTERED: &str = "__registeredServices";
/// Lists the services constructed so far.
pub const MARKER_LOADED: &str = "__loadedServices";

/// The reserved introspection markers.
pub const RESERVED_MARKERS: [&str; 3] = [MARKER_IS_VIRTUALIZED, MARKER_REGISTERED, MARKER_LOADED];

// ---------------------------------------------------------------------------
// Method classification
// ---------------------------------------------------------------------------

/// What a method does, as far as the sandbox and the cache care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Touches no backend data (`toString`, `getName`).  Only the service
    /// and method checks apply.
    Local,
    Read,
    Write,
    Delete,
    /// Mints a new resource.  Counted as a write.
    Create,
}

impl MethodKind {
    /// The sandbox operation kind, or `None` for local methods.
    pub fn op_kind(&self) -> Option<OpKind> {
        match self {
            Self::Local => None,
            Self::Read => Some(OpKind::Read),
            Self::Write | Self::Create => Some(OpKind::Write),
            Self::Delete => Some(OpKind::Delete),
        }
    }

    /// Whether a successful call may have changed backend data.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Write | Self::Delete | Self::Create)
    }
}

/// Declaration of one callable member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub kind: MethodKind,
    /// Argument holding the id of the targeted resource, if any.
    pub resource_arg: Option<String>,
    /// Argument holding the cache scope, if any.
    pub scope_arg: Option<String>,
    /// Field of a `Create` result holding the new id.
    pub created_id_field: String,
    /// Kind recorded for created resources (`file`, `folder`, ...).
    pub created_kind: String,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            kind,
            resource_arg: None,
            scope_arg: None,
            created_id_field: "id".to_string(),
            created_kind: "resource".to_string(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Local)
    }

    pub fn read(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Read)
    }

    pub fn write(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Write)
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Delete)
    }

    pub fn create(name: impl Into<String>, created_kind: impl Into<String>) -> Self {
        let mut spec = Self::new(name, MethodKind::Create);
        spec.created_kind = created_kind.into();
        spec
    }

    /// The resource id is taken from argument `arg`.
    pub fn on_resource(mut self, arg: impl Into<String>) -> Self {
        self.resource_arg = Some(arg.into());
        self
    }

    /// The cache scope is taken from argument `arg`.
    pub fn scoped_by(mut self, arg: impl Into<String>) -> Self {
        self.scope_arg = Some(arg.into());
        self
    }

    /// The created id is read from result field `field`.
    pub fn returning_id(mut self, field: impl Into<String>) -> Self {
        self.created_id_field = field.into();
        self
    }

    /// Target resource id named by `args`, if the method takes one and the
    /// caller supplied it.
    pub fn resource_id<'a>(&self, args: &'a Value) -> Option<&'a str> {
        args.get(self.resource_arg.as_deref()?)?.as_str()
    }

    /// Cache scope named by `args`.
    pub fn scope<'a>(&self, args: &'a Value) -> Option<&'a str> {
        args.get(self.scope_arg.as_deref()?)?.as_str()
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The declared surface of a service.
///
/// `parent` models inherited members: a manifest can extend a base surface
/// and shadow any of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub service: String,
    pub methods: Vec<MethodSpec>,
    pub properties: Vec<String>,
    pub parent: Option<Box<ServiceManifest>>,
}

impl ServiceManifest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: Vec::new(),
            properties: Vec::new(),
            parent: None,
        }
    }

    pub fn with_method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(name.into());
        self
    }

    pub fn extending(mut self, parent: ServiceManifest) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Iterate this manifest and its ancestors, nearest first.
    fn chain(&self) -> impl Iterator<Item = &ServiceManifest> {
        std::iter::successors(Some(self), |m| m.parent.as_deref())
    }

    /// Find a method anywhere in the chain; the nearest declaration wins.
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.chain()
            .find_map(|m| m.methods.iter().find(|spec| spec.name == name))
    }

    /// Whether `name` is a declared property anywhere in the chain and not
    /// shadowed by a nearer method.
    pub fn has_property(&self, name: &str) -> bool {
        for manifest in self.chain() {
            if manifest.methods.iter().any(|spec| spec.name == name) {
                return false;
            }
            if manifest.properties.iter().any(|p| p == name) {
                return true;
            }
        }
        false
    }

    /// Every member name across the chain, nearest declarations first,
    /// each name once.
    pub fn members(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for manifest in self.chain() {
            let names = manifest
                .methods
                .iter()
                .map(|spec| spec.name.as_str())
                .chain(manifest.properties.iter().map(String::as_str));
            for name in names {
                if seen.insert(name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// A virtualized service implementation.
///
/// Methods are synchronous: implementations that need asynchronous work
/// run it through the bridge.
pub trait Service: Send + Sync {
    /// The published service name.
    fn name(&self) -> &str;

    /// The declared surface.
    fn manifest(&self) -> &ServiceManifest;

    /// Current value of a declared property.
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Run a declared method.
    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CallError>;

    /// Display name of a resource, used to match name-based sandbox rules.
    fn resource_name(&self, _id: &str) -> Option<String> {
        None
    }

    /// Trash one resource created in this session.  Called by teardown,
    /// outside the sandbox.
    fn trash_resource(&self, resource: &SessionResource) -> Result<(), CallError> {
        Err(CallError::Unsupported {
            method: format!("trash {} `{}`", resource.kind, resource.id),
        })
    }
}

/// Constructor of one service.  May fail, e.g. for missing credentials.
pub type ServiceFactory =
    Arc<dyn Fn() -> Result<Arc<dyn Service>, BoxError> + Send + Sync + 'static>;

/// Wrap a closure as a [`ServiceFactory`].
pub fn factory<F>(f: F) -> ServiceFactory
where
    F: Fn() -> Result<Arc<dyn Service>, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}
