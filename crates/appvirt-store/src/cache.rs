//! Fingerprint response cache backed by [`moka`].
//!
//! Entries are partitioned by a *scope* (the id of the resource a request
//! reads from, e.g. one spreadsheet) and keyed inside the partition by the
//! [`fingerprint`](crate::digest::fingerprint) of the request parameters.
//!
//! Invalidation is deliberately coarse: any mutation of a scope drops the
//! whole partition via [`FingerprintCache::invalidate_scope`].  Dropping an
//! entry that was still valid costs one extra round-trip; keeping one that
//! is stale would serve wrong data.
//!
//! The cache is purely an optimization.  With [`CacheConfig::enabled`] set
//! to `false` every lookup misses and every insert is ignored.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::digest::fingerprint;

// ── config ───────────────────────────────────────────────────────────

/// Static cache settings, read once when the cache is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch.  A disabled cache never stores anything.
    pub enabled: bool,
    /// Maximum number of scopes kept at once.
    pub max_scopes: u64,
    /// Maximum number of entries kept per scope.
    pub max_entries_per_scope: u64,
    /// Time-to-live in seconds for each entry.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_scopes: 1_000,
            max_entries_per_scope: 500,
            ttl_seconds: 300,
        }
    }
}

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Total cache hits since creation or the last reset.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation or the last reset.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of scope or entry invalidations.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a value between 0.0 and 1.0 (returns 0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} total={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.total(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── fingerprint cache ────────────────────────────────────────────────

type Partition = Cache<String, Value>;

/// Scope-partitioned memoization map for read-shaped requests.
pub struct FingerprintCache {
    config: CacheConfig,
    partitions: Cache<String, Partition>,
    stats: CacheStats,
}

impl FingerprintCache {
    /// Build a cache from its configuration.
    pub fn new(config: CacheConfig) -> Self {
        let partitions = Cache::builder().max_capacity(config.max_scopes).build();

        debug!(
            enabled = config.enabled,
            max_scopes = config.max_scopes,
            max_entries_per_scope = config.max_entries_per_scope,
            ttl_seconds = config.ttl_seconds,
            "fingerprint cache created"
        );

        Self {
            config,
            partitions,
            stats: CacheStats::default(),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    /// Whether the cache stores entries at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up the value cached for `params` under `scope`.  `None` is a miss.
    pub fn get(&self, scope: &str, params: &Value) -> Option<Value> {
        if !self.config.enabled {
            self.stats.record_miss();
            return None;
        }

        let key = fingerprint(params);
        let found = self
            .partitions
            .get(scope)
            .and_then(|partition| partition.get(&key));

        match found {
            Some(value) => {
                self.stats.record_hit();
                debug!(scope, key = %key, "cache hit");
                Some(value)
            }
            None => {
                self.stats.record_miss();
                debug!(scope, key = %key, "cache miss");
                None
            }
        }
    }

    /// Store `value` for `params` under `scope`, replacing any previous entry.
    pub fn put(&self, scope: &str, params: &Value, value: Value) {
        if !self.config.enabled {
            return;
        }

        let key = fingerprint(params);
        let partition = self.partitions.get_with(scope.to_string(), || {
            Cache::builder()
                .max_capacity(self.config.max_entries_per_scope)
                .time_to_live(Duration::from_secs(self.config.ttl_seconds))
                .build()
        });
        partition.insert(key.clone(), value);
        debug!(scope, key = %key, "cache insert");
    }

    /// Drop every entry cached under `scope`.
    pub fn invalidate_scope(&self, scope: &str) {
        self.partitions.invalidate(scope);
        self.stats.record_invalidation();
        debug!(scope, "cache scope invalidated");
    }

    /// Drop the single entry cached for `params` under `scope`.
    pub fn invalidate_entry(&self, scope: &str, params: &Value) {
        if let Some(partition) = self.partitions.get(scope) {
            let key = fingerprint(params);
            partition.invalidate(&key);
            debug!(scope, key = %key, "cache entry invalidated");
        }
        self.stats.record_invalidation();
    }

    /// Drop every partition.
    pub fn invalidate_all(&self) {
        self.partitions.invalidate_all();
        self.stats.record_invalidation();
        debug!("cache invalidate_all");
    }

    /// Try the cache first; on a miss call `loader`, cache its result and
    /// return it.  Loader errors are returned as-is and nothing is cached.
    pub fn get_or_load<E, F>(&self, scope: &str, params: &Value, loader: F) -> Result<Value, E>
    where
        F: FnOnce() -> Result<Value, E>,
    {
        if let Some(hit) = self.get(scope, params) {
            return Ok(hit);
        }
        let value = loader()?;
        self.put(scope, params, value.clone());
        Ok(value)
    }

    /// Cumulative hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Reset the hit/miss counters, e.g. at the start of a test run.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// ── tests ────────────────────────────────────────────────────────────
