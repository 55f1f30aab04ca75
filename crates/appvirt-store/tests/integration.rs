//! Integration tests for the appvirt-store crate.
//!
//! These tests exercise the property store against a real SQLite database
//! on disk (via tempfile) and the fingerprint cache's scope invalidation.

use appvirt_store::{CacheConfig, FingerprintCache, PropertyStore};
use serde_json::json;

// ═══════════════════════════════════════════════════════════════════════
//  Property store on disk
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn property_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("props.db");

    {
        let store = PropertyStore::open(&path).unwrap();
        store.set("script", "greeting", "hello").await.unwrap();
        store.set("script", "count", "3").await.unwrap();
    }

    let store = PropertyStore::open(&path).unwrap();
    let all = store.list("script").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.get("greeting").map(String::as_str), Some("hello"));
    assert_eq!(all.get("count").map(String::as_str), Some("3"));
    assert!(path.exists());
}

#[tokio::test]
async fn property_store_open_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("props.db");

    drop(PropertyStore::open(&path).unwrap());
    let store = PropertyStore::open(&path).unwrap();
    assert!(store.list("anything").await.unwrap().is_empty());
}

#[tokio::test]
async fn property_store_delete_all_only_touches_one_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = PropertyStore::open(dir.path().join("props.db")).unwrap();

    for i in 0..5 {
        store.set("user", &format!("k{i}"), "v").await.unwrap();
    }
    store.set("document", "k0", "kept").await.unwrap();

    assert_eq!(store.delete_all("user").await.unwrap(), 5);
    assert!(store.list("user").await.unwrap().is_empty());
    assert_eq!(
        store.get("document", "k0").await.unwrap().as_deref(),
        Some("kept")
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Fingerprint cache
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn cache_write_invalidation_scenario() {
    let cache = FingerprintCache::default();
    cache.put("s1", &json!({"a": 1}), json!({"v": 9}));
    assert_eq!(cache.get("s1", &json!({"a": 1})), Some(json!({"v": 9})));

    // A write-shaped call against s1 drops the partition.
    cache.invalidate_scope("s1");

    assert_eq!(cache.get("s1", &json!({"a": 1})), None);
}

#[test]
fn cache_capacity_config_is_respected_for_lookups() {
    let cache = FingerprintCache::new(CacheConfig {
        enabled: true,
        max_scopes: 10,
        max_entries_per_scope: 10,
        ttl_seconds: 60,
    });

    for i in 0..5 {
        cache.put("sheet", &json!({"range": i}), json!(i));
    }
    for i in 0..5 {
        assert_eq!(cache.get("sheet", &json!({"range": i})), Some(json!(i)));
    }
    assert_eq!(cache.stats().hits(), 5);
}
