//! Persisted key/value property records on SQLite.
//!
//! The [`PropertyStore`] wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//! Callers that need a blocking API run these futures through the
//! synchronous bridge.
//!
//! Records live in named stores (e.g. `script`, `user`, `cache:script`).
//! A record may carry an expiry, which makes the same table serve both
//! property-style storage and cache-style storage; expired records read as
//! absent and are purged lazily.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Schema version written to `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// Thread-safe handle to the property database.
#[derive(Clone)]
pub struct PropertyStore {
    conn: Arc<Mutex<Connection>>,
}

impl PropertyStore {
    /// Open (or create) a store at `path`, apply pragmas and the schema.
    ///
    /// This call blocks briefly (file I/O); call it during startup.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening property store");

        let conn = Connection::open(path)?;
        Self::prepare(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, useful for tests and local runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory property store");

        let conn = Connection::open_in_memory()?;
        Self::prepare(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Read one record.  Missing and expired records both return `None`.
    pub async fn get(&self, store: &str, key: &str) -> StoreResult<Option<String>> {
        let (store, key) = (store.to_string(), key.to_string());
        self.execute(move |conn| {
            let now = Utc::now().timestamp();
            let value = conn
                .query_row(
                    "SELECT value FROM properties
                     WHERE store = ?1 AND key = ?2
                       AND (expires_at IS NULL OR expires_at > ?3)",
                    params![store, key, now],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    /// Write one record with no expiry, replacing any previous value.
    pub async fn set(&self, store: &str, key: &str, value: &str) -> StoreResult<()> {
        self.upsert(store, key, value, None).await
    }

    /// Write one record that expires after `ttl_seconds`.
    pub async fn set_with_ttl(
        &self,
        store: &str,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> StoreResult<()> {
        if ttl_seconds <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "ttl must be positive, got {ttl_seconds}"
            )));
        }
        let expires_at = Utc::now().timestamp() + ttl_seconds;
        self.upsert(store, key, value, Some(expires_at)).await
    }

    /// Remove one record.  Returns whether a record was removed.
    pub async fn delete(&self, store: &str, key: &str) -> StoreResult<bool> {
        let (store, key) = (store.to_string(), key.to_string());
        self.execute(move |conn| {
            let rows = conn.execute(
                "DELETE FROM properties WHERE store = ?1 AND key = ?2",
                params![store, key],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// All live records of a store, ordered by key.
    pub async fn list(&self, store: &str) -> StoreResult<BTreeMap<String, String>> {
        let store = store.to_string();
        self.execute(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "DELETE FROM properties WHERE store = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![store, now],
            )?;

            let mut stmt = conn.prepare(
                "SELECT key, value FROM properties WHERE store = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![store], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut out = BTreeMap::new();
            for row in rows {
                let (k, v) = row?;
                out.insert(k, v);
            }
            Ok(out)
        })
        .await
    }

    /// Remove every record of a store.  Returns the number removed.
    pub async fn delete_all(&self, store: &str) -> StoreResult<usize> {
        let store = store.to_string();
        self.execute(move |conn| {
            let rows = conn.execute("DELETE FROM properties WHERE store = ?1", params![store])?;
            Ok(rows)
        })
        .await
    }

    async fn upsert(
        &self,
        store: &str,
        key: &str,
        value: &str,
        expires_at: Option<i64>,
    ) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("property key must not be empty".into()));
        }
        let (store, key, value) = (store.to_string(), key.to_string(), value.to_string());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO properties (store, key, value, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(store, key) DO UPDATE SET
                   value = excluded.value,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at",
                params![store, key, value, expires_at, Utc::now().timestamp()],
            )?;
            Ok(())
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool.
    async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    // ── schema ───────────────────────────────────────────────────────

    fn prepare(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        if version < SCHEMA_VERSION {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS properties (
                    store      TEXT NOT NULL,
                    key        TEXT NOT NULL,
                    value      TEXT NOT NULL,
                    expires_at INTEGER,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (store, key)
                );",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            info!(version = SCHEMA_VERSION, "property store schema applied");
        }

        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
