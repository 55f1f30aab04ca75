//! # appvirt-store
//!
//! Process-local storage for the appvirt runtime.
//!
//! - [`cache`] -- scope-partitioned fingerprint cache (moka) that memoizes
//!   read-shaped service calls and is invalidated per scope on mutation.
//! - [`digest`] -- order-independent SHA-256 fingerprints of request
//!   parameters, used as cache keys.
//! - [`properties`] -- small persisted key/value records on SQLite, used by
//!   property-style and cache-style services.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  FingerprintCache                            │
//! │    scope ─▶ partition (moka)                 │
//! │               fingerprint(params) ─▶ value   │
//! ├──────────────────────────────────────────────┤
//! │  PropertyStore (rusqlite WAL)                │
//! │    (store, key) ─▶ value [expires_at]        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod digest;
pub mod error;
pub mod properties;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheConfig, CacheStats, FingerprintCache};
pub use digest::{canonical_json, fingerprint};
pub use error::{StoreError, StoreResult};
pub use properties::PropertyStore;
