//! Blocking execution of asynchronous units of work.
//!
//! [`SyncBridge`] owns a dedicated multi-threaded tokio runtime.  A call to
//! [`SyncBridge::run`] spawns the unit onto that runtime and parks the
//! calling thread on a rendezvous channel until the unit's output arrives.
//! The caller therefore never observes a pending state: it gets the result,
//! or an error, and only then continues.
//!
//! Two calls issued one after the other from the same thread are strictly
//! ordered because the first call does not return before its unit has
//! finished.  Calls from unrelated threads share no lock and proceed
//! independently on the worker pool.
//!
//! ```text
//!   caller thread                 bridge runtime
//!   ─────────────                 ──────────────
//!   run(label, fut) ──spawn──────▶ fut.await
//!        │                            │
//!   rx.recv() (blocked)  ◀──tx.send── output
//!        │
//!   return output
//! ```

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace, warn};

use crate::error::{BoxError, BridgeError, Result};

thread_local! {
    static IN_BRIDGE_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Default number of worker threads.
const DEFAULT_WORKER_THREADS: usize = 2;

/// Default per-unit timeout in seconds.
const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for [`SyncBridge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Worker threads in the bridge runtime.
    pub worker_threads: usize,
    /// Per-unit timeout in seconds.  `None` lets units run until done.
    pub unit_timeout_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            unit_timeout_secs: Some(DEFAULT_UNIT_TIMEOUT_SECS),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    /// The configured timeout as a [`Duration`].
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Runs asynchronous work to completion on behalf of blocking callers.
pub struct SyncBridge {
    runtime: Option<Runtime>,
    timeout: Option<Duration>,
    units: AtomicU64,
}

impl SyncBridge {
    /// Start a bridge with its own worker runtime.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let threads = config.worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("appvirt-bridge")
            .on_thread_start(|| IN_BRIDGE_WORKER.set(true))
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Startup {
                reason: e.to_string(),
            })?;

        debug!(
            worker_threads = threads,
            unit_timeout = ?config.unit_timeout(),
            "sync bridge started"
        );

        Ok(Self {
            runtime: Some(runtime),
            timeout: config.unit_timeout(),
            units: AtomicU64::new(0),
        })
    }

    /// Override the per-unit timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the current thread is one of this process's bridge workers.
    pub fn on_worker_thread() -> bool {
        IN_BRIDGE_WORKER.get()
    }

    /// Handle to the worker runtime, for spawning fire-and-forget work.
    pub fn handle(&self) -> Option<Handle> {
        self.runtime.as_ref().map(|rt| rt.handle().clone())
    }

    /// Number of units submitted so far.
    pub fn units_run(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    /// Run `unit` on the worker runtime and block until it yields.
    pub fn run<F, T>(&self, label: &str, unit: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if Self::on_worker_thread() {
            warn!(label, "bridge called from its own worker thread");
            return Err(BridgeError::Reentrant {
                label: label.to_string(),
            });
        }

        let runtime = self.runtime.as_ref().ok_or_else(|| BridgeError::Abandoned {
            label: label.to_string(),
        })?;

        let (tx, rx) = channel::bounded(1);
        let timeout = self.timeout;
        let sequence = self.units.fetch_add(1, Ordering::Relaxed);
        trace!(label, sequence, "unit started");

        runtime.spawn(async move {
            let output = match timeout {
                Some(limit) => tokio::time::timeout(limit, unit).await.ok(),
                None => Some(unit.await),
            };
            // The receiver only disappears if the caller thread died.
            let _ = tx.send(output);
        });

        match rx.recv() {
            Ok(Some(output)) => {
                trace!(label, sequence, "unit finished");
                Ok(output)
            }
            Ok(None) => {
                let after = timeout.unwrap_or_default();
                warn!(label, sequence, ?after, "unit timed out");
                Err(BridgeError::Timeout {
                    label: label.to_string(),
                    after,
                })
            }
            Err(_) => {
                warn!(label, sequence, "unit abandoned");
                Err(BridgeError::Abandoned {
                    label: label.to_string(),
                })
            }
        }
    }

    /// Like [`Self::run`] for fallible units: an `Err` output becomes
    /// [`BridgeError::Unit`].
    pub fn run_sync<F, T, E>(&self, label: &str, unit: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.run(label, unit)?
            .map_err(|e| BridgeError::unit(label, e))
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Safe to call from inside another runtime, unlike a plain drop.
            runtime.shutdown_background();
            debug!("sync bridge stopped");
        }
    }
}

impl std::fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("timeout", &self.timeout)
            .field("units", &self.units_run())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn bridge() -> SyncBridge {
        SyncBridge::new(BridgeConfig::default()).unwrap()
    }

    #[test]
    fn returns_unit_output() {
        let bridge = bridge();
        let value = bridge.run("answer", async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
        assert_eq!(bridge.units_run(), 1);
    }

    #[test]
    fn awaits_real_suspension() {
        let bridge = bridge();
        let value = bridge
            .run("sleepy", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                "done"
            })
            .unwrap();
        assert_eq!(value, "done");
    }

    #[test]
    fn unit_runs_exactly_once() {
        let bridge = bridge();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bridge
            .run("once", async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_sync_wraps_unit_errors() {
        let bridge = bridge();
        let err = bridge
            .run_sync("failing", async { Err::<(), _>("connection reset") })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unit { ref label, .. } if label == "failing"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn timeout_surfaces_as_error() {
        let bridge = bridge().with_timeout(Some(Duration::from_millis(20)));
        let err = bridge
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }

    #[test]
    fn panicking_unit_is_abandoned() {
        let bridge = bridge();
        let err = bridge
            .run("boom", async {
                panic!("unit exploded");
            })
            .map(|()| ())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Abandoned { .. }));

        // The runtime survives a panicking unit.
        assert_eq!(bridge.run("after", async { 1 }).unwrap(), 1);
    }

    #[test]
    fn nested_call_is_refused() {
        let bridge = Arc::new(bridge());
        let inner = Arc::clone(&bridge);
        let nested = bridge
            .run("outer", async move { inner.run("inner", async { 1 }) })
            .unwrap();
        assert!(matches!(nested, Err(BridgeError::Reentrant { .. })));
        assert!(!SyncBridge::on_worker_thread());
    }

    #[test]
    fn can_drop_inside_async_context() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let bridge = SyncBridge::new(BridgeConfig::default().with_worker_threads(1)).unwrap();
            drop(bridge);
        });
    }
}
