//! Integration tests for the appvirt-services crate.
//!
//! Run the reference services behind a real registry, sandbox and cache.
//! Plain `#[test]` throughout: the bridge owns its own runtime.

use std::sync::Arc;

use appvirt_bridge::{BridgeConfig, SyncBridge};
use appvirt_kernel::{KernelError, MARKER_LOADED, ServiceRegistry};
use appvirt_sandbox::{
    DenialReason, OpKind, ResourceRule, SandboxConfig, SandboxEngine, SandboxError,
    SandboxSettings, UsageLimit,
};
use appvirt_services::{
    DRIVE_SERVICE, PROPERTIES_SERVICE, ServiceDeps, URL_FETCH_SERVICE, register_defaults,
};
use appvirt_store::{CacheConfig, FingerprintCache, PropertyStore};
use serde_json::{Value, json};

struct Fixture {
    registry: ServiceRegistry,
    deps: ServiceDeps,
}

fn fixture(config: SandboxConfig) -> Fixture {
    fixture_with_store(config, PropertyStore::open_in_memory().unwrap())
}

fn fixture_with_store(config: SandboxConfig, store: PropertyStore) -> Fixture {
    let bridge = Arc::new(SyncBridge::new(BridgeConfig::new()).unwrap());
    let deps = ServiceDeps::new(bridge, store);
    let registry = ServiceRegistry::new(
        Arc::new(SandboxEngine::new(config)),
        Arc::new(FingerprintCache::new(CacheConfig::default())),
    );
    register_defaults(&registry, &deps).unwrap();
    Fixture { registry, deps }
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
//  Registration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn defaults_register_lazily() {
    let f = fixture(SandboxConfig::default());
    assert_eq!(
        f.registry.registered(),
        vec![DRIVE_SERVICE, PROPERTIES_SERVICE, URL_FETCH_SERVICE]
    );
    assert!(f.registry.loaded().is_empty());

    let drive = f.registry.service(DRIVE_SERVICE).unwrap();
    assert_eq!(drive.call("toString", json!({})).unwrap(), json!("Drive"));
    assert_eq!(
        drive.get(MARKER_LOADED).unwrap().into_value(),
        Some(json!(["Drive"]))
    );
    assert_eq!(
        drive.get("rootFolderId").unwrap().into_value(),
        Some(json!("root"))
    );

    // Registering the same collaborators twice is rejected: new factories.
    assert!(register_defaults(&f.registry, &f.deps).is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Drive under the sandbox
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn created_file_is_writable_under_strict_empty_rules() {
    let f = fixture(SandboxConfig::new().with_strict(true));
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();

    let file = drive
        .call("createFile", json!({ "name": "r1", "content": "draft" }))
        .unwrap();
    let id = id_of(&file);

    let updated = drive
        .call("updateFile", json!({ "id": id, "content": "final" }))
        .unwrap();
    assert_eq!(updated["content"], "final");
    assert!(f.registry.sandbox().session().contains(&id));
}

#[test]
fn foreign_file_needs_a_rule() {
    let f = fixture(SandboxConfig::default());
    let foreign = f.deps.drive.seed_file("budget.xlsx", "numbers");
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();

    let err = drive
        .call("getFileById", json!({ "id": foreign }))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Sandbox(SandboxError::AccessDenied {
            reason: DenialReason::NoMatchingRule,
            ..
        })
    ));

    // Creating under an explicit foreign parent is a write to that parent.
    assert!(drive
        .call("createFile", json!({ "name": "x", "parentId": "root" }))
        .is_err());
}

#[test]
fn name_rule_grants_read_but_not_write() {
    let config = SandboxConfig::new().with_service(
        DRIVE_SERVICE,
        SandboxSettings::new().with_rule(ResourceRule::read_only("budget.xlsx")),
    );
    let f = fixture(config);
    let foreign = f.deps.drive.seed_file("budget.xlsx", "numbers");
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();

    let file = drive.call("getFileById", json!({ "id": foreign })).unwrap();
    assert_eq!(file["content"], "numbers");

    let err = drive
        .call("updateFile", json!({ "id": foreign, "content": "oops" }))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Sandbox(SandboxError::AccessDenied {
            capability: OpKind::Write,
            reason: DenialReason::Denied,
            ..
        })
    ));
    assert!(!f.deps.drive.is_trashed(&foreign));
}

#[test]
fn scoped_reads_are_cached_until_a_write() {
    let f = fixture(SandboxConfig::default());
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();
    let id = id_of(&drive.call("createFile", json!({ "name": "a" })).unwrap());

    drive.call("getFileById", json!({ "id": id })).unwrap();
    drive.call("getFileById", json!({ "id": id })).unwrap();
    assert_eq!(f.registry.cache().stats().hits(), 1);

    drive
        .call("renameFile", json!({ "id": id, "name": "b" }))
        .unwrap();
    let after = drive.call("getFileById", json!({ "id": id })).unwrap();
    assert_eq!(after["name"], "b");
    assert_eq!(f.registry.cache().stats().hits(), 1);
}

#[test]
fn write_quota_is_enforced() {
    let config = SandboxConfig::new().with_service(
        DRIVE_SERVICE,
        SandboxSettings::new().with_usage_limit(UsageLimit::per_kind([(OpKind::Write, 2)])),
    );
    let f = fixture(config);
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();

    drive.call("createFile", json!({ "name": "1" })).unwrap();
    drive.call("createFile", json!({ "name": "2" })).unwrap();
    let err = drive.call("createFile", json!({ "name": "3" })).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Sandbox(SandboxError::UsageLimitExceeded { used: 2, limit: 2, .. })
    ));
    assert_eq!(f.registry.sandbox().settings(DRIVE_SERVICE).usage(OpKind::Write), 2);
    // Reads are not limited.
    drive.call("getRootFolder", json!({})).unwrap();
}

#[test]
fn teardown_trashes_only_session_items() {
    let f = fixture(SandboxConfig::default());
    let foreign = f.deps.drive.seed_file("keep.txt", "");
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();

    let folder = id_of(&drive.call("createFolder", json!({ "name": "tmp" })).unwrap());
    let file = id_of(
        &drive
            .call("createFile", json!({ "name": "scratch", "parentId": folder }))
            .unwrap(),
    );

    let report = f.registry.trash();
    assert!(report.is_clean());
    assert_eq!(report.trashed.len(), 2);
    assert!(f.deps.drive.is_trashed(&folder));
    assert!(f.deps.drive.is_trashed(&file));
    assert!(!f.deps.drive.is_trashed(&foreign));
    assert!(f.registry.sandbox().session().is_empty());
}

#[test]
fn teardown_respects_cleanup_flag() {
    let config = SandboxConfig::new()
        .with_service(DRIVE_SERVICE, SandboxSettings::new().with_cleanup(false));
    let f = fixture(config);
    let drive = f.registry.service(DRIVE_SERVICE).unwrap();
    let id = id_of(&drive.call("createFile", json!({ "name": "kept" })).unwrap());

    let report = f.registry.trash();
    assert!(report.trashed.is_empty());
    assert_eq!(report.skipped_services, vec![DRIVE_SERVICE.to_string()]);
    assert!(!f.deps.drive.is_trashed(&id));
}

// ═══════════════════════════════════════════════════════════════════════
//  Properties through the bridge
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn property_reads_see_every_write() {
    let f = fixture(SandboxConfig::default());
    let props = f.registry.service(PROPERTIES_SERVICE).unwrap();
    let get = json!({ "store": "script", "key": "cursor" });

    props
        .call("setProperty", json!({ "store": "script", "key": "cursor", "value": "1" }))
        .unwrap();
    assert_eq!(props.call("getProperty", get.clone()).unwrap(), json!("1"));
    assert_eq!(props.call("getProperty", get.clone()).unwrap(), json!("1"));
    assert_eq!(f.registry.cache().stats().hits(), 0);

    props
        .call("setProperty", json!({ "store": "script", "key": "cursor", "value": "2" }))
        .unwrap();
    assert_eq!(props.call("getProperty", get).unwrap(), json!("2"));

    props
        .call("deleteAllProperties", json!({ "store": "script" }))
        .unwrap();
    assert_eq!(
        props.call("getProperties", json!({ "store": "script" })).unwrap(),
        json!({})
    );
}

#[test]
fn expired_property_is_not_served() {
    let f = fixture(SandboxConfig::default());
    let props = f.registry.service(PROPERTIES_SERVICE).unwrap();
    let get = json!({ "store": "script", "key": "lease" });

    props
        .call(
            "setPropertyWithTtl",
            json!({ "store": "script", "key": "lease", "value": "held", "ttlSecs": 1 }),
        )
        .unwrap();
    assert_eq!(props.call("getProperty", get.clone()).unwrap(), json!("held"));

    std::thread::sleep(std::time::Duration::from_millis(2100));

    assert_eq!(props.call("getProperty", get).unwrap(), json!(null));
    assert_eq!(
        props.call("getProperties", json!({ "store": "script" })).unwrap(),
        json!({})
    );
}

#[test]
fn properties_persist_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("props.db");

    {
        let f = fixture_with_store(SandboxConfig::default(), PropertyStore::open(&path).unwrap());
        f.registry
            .service(PROPERTIES_SERVICE)
            .unwrap()
            .call("setProperty", json!({ "store": "user", "key": "lang", "value": "en" }))
            .unwrap();
    }

    let f = fixture_with_store(SandboxConfig::default(), PropertyStore::open(&path).unwrap());
    let value = f
        .registry
        .service(PROPERTIES_SERVICE)
        .unwrap()
        .call("getProperty", json!({ "store": "user", "key": "lang" }))
        .unwrap();
    assert_eq!(value, json!("en"));
}

#[test]
fn disabled_service_refuses_every_call() {
    let config = SandboxConfig::new().with_service(
        PROPERTIES_SERVICE,
        SandboxSettings::new().with_enabled(false),
    );
    let f = fixture(config);
    let props = f.registry.service(PROPERTIES_SERVICE).unwrap();
    let err = props
        .call("getProperties", json!({ "store": "user" }))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Sandbox(SandboxError::ServiceDisabled { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  UrlFetch
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn fetch_failure_is_a_call_error() {
    let f = fixture(SandboxConfig::default());
    let fetch = f.registry.service(URL_FETCH_SERVICE).unwrap();
    let err = fetch
        .call("fetch", json!({ "url": "http://127.0.0.1:1/", "useAuth": false }))
        .unwrap_err();
    assert!(matches!(err, KernelError::Call { ref method, .. } if method == "fetch"));

    let err = fetch.call("fetch", json!({ "url": "not a url" })).unwrap_err();
    assert!(matches!(err, KernelError::Call { .. }));
    assert!(err.to_string().contains("fetch"));
}
