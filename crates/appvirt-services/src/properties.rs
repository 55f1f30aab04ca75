//! Properties service: named key/value stores persisted in SQLite.
//!
//! Every method names its store in the `store` argument.  Reads go to the
//! store each time since records may expire between calls; writes still
//! invalidate the store's cache scope.

use std::sync::Arc;

use appvirt_bridge::SyncBridge;
use appvirt_kernel::{CallError, MethodSpec, Service, ServiceManifest};
use appvirt_store::PropertyStore;
use serde_json::{Value, json};

use crate::args::require_str;
use crate::drive::base_manifest;

/// Published service name.
pub const PROPERTIES_SERVICE: &str = "Properties";

pub struct PropertiesService {
    manifest: ServiceManifest,
    store: PropertyStore,
    bridge: Arc<SyncBridge>,
}

impl PropertiesService {
    pub fn new(store: PropertyStore, bridge: Arc<SyncBridge>) -> Self {
        Self {
            manifest: manifest(),
            store,
            bridge,
        }
    }

    fn get_property(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "store", "getProperty")?.to_string();
        let key = require_str(args, "key", "getProperty")?.to_string();
        let store = self.store.clone();
        let value = self
            .bridge
            .run_sync("properties.get", async move { store.get(&name, &key).await })?;
        Ok(value.map_or(Value::Null, Value::String))
    }

    fn get_properties(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "store", "getProperties")?.to_string();
        let store = self.store.clone();
        let records = self
            .bridge
            .run_sync("properties.list", async move { store.list(&name).await })?;
        Ok(json!(records))
    }

    fn set_property(&self, args: &Value, with_ttl: bool) -> Result<Value, CallError> {
        let method = if with_ttl { "setPropertyWithTtl" } else { "setProperty" };
        let name = require_str(args, "store", method)?.to_string();
        let key = require_str(args, "key", method)?.to_string();
        let value = property_text(args, method)?;
        let ttl = if with_ttl {
            let secs = args
                .get("ttlSecs")
                .and_then(Value::as_i64)
                .ok_or_else(|| CallError::invalid_args(method, "missing integer field `ttlSecs`"))?;
            Some(secs)
        } else {
            None
        };

        let store = self.store.clone();
        self.bridge.run_sync("properties.set", async move {
            match ttl {
                Some(secs) => store.set_with_ttl(&name, &key, &value, secs).await,
                None => store.set(&name, &key, &value).await,
            }
        })?;
        Ok(Value::Null)
    }

    fn delete_property(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "store", "deleteProperty")?.to_string();
        let key = require_str(args, "key", "deleteProperty")?.to_string();
        let store = self.store.clone();
        let removed = self
            .bridge
            .run_sync("properties.delete", async move { store.delete(&name, &key).await })?;
        Ok(Value::Bool(removed))
    }

    fn delete_all(&self, args: &Value) -> Result<Value, CallError> {
        let name = require_str(args, "store", "deleteAllProperties")?.to_string();
        let store = self.store.clone();
        let removed = self
            .bridge
            .run_sync("properties.delete_all", async move { store.delete_all(&name).await })?;
        Ok(json!(removed))
    }
}

impl Service for PropertiesService {
    fn name(&self) -> &str {
        PROPERTIES_SERVICE
    }

    fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CallError> {
        match method {
            "getName" | "toString" => Ok(json!(PROPERTIES_SERVICE)),
            "getProperty" => self.get_property(args),
            "getProperties" => self.get_properties(args),
            "setProperty" => self.set_property(args, false),
            "setPropertyWithTtl" => self.set_property(args, true),
            "deleteProperty" => self.delete_property(args),
            "deleteAllProperties" => self.delete_all(args),
            other => Err(CallError::Unsupported {
                method: other.to_string(),
            }),
        }
    }
}

/// Stored values are text.  Non-string scalars are stored in their JSON
/// form; objects and arrays are rejected.
fn property_text(args: &Value, method: &str) -> Result<String, CallError> {
    match args.get("value") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(_) => Err(CallError::invalid_args(method, "field `value` must be a scalar")),
        None => Err(CallError::invalid_args(method, "missing required field `value`")),
    }
}

fn manifest() -> ServiceManifest {
    ServiceManifest::new(PROPERTIES_SERVICE)
        .with_method(MethodSpec::read("getProperty"))
        .with_method(MethodSpec::read("getProperties"))
        .with_method(MethodSpec::write("setProperty").scoped_by("store"))
        .with_method(MethodSpec::write("setPropertyWithTtl").scoped_by("store"))
        .with_method(MethodSpec::delete("deleteProperty").scoped_by("store"))
        .with_method(MethodSpec::delete("deleteAllProperties").scoped_by("store"))
        .extending(base_manifest())
}
