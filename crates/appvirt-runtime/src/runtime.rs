//! The assembled runtime and its process-wide accessor.

use std::sync::{Arc, OnceLock};

use appvirt_auth::{RefreshTokenSource, StaticTokenSource, TokenManager, TokenSource};
use appvirt_bridge::SyncBridge;
use appvirt_kernel::{ServiceHandle, ServiceRegistry};
use appvirt_sandbox::{SandboxEngine, TrashReport};
use appvirt_services::{LocalDrive, ServiceDeps, register_defaults};
use appvirt_store::{FingerprintCache, PropertyStore};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Bridge, sandbox, cache, credentials and registry wired together, with
/// the reference services registered.
pub struct Runtime {
    config: RuntimeConfig,
    registry: ServiceRegistry,
    deps: ServiceDeps,
}

impl Runtime {
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let bridge = Arc::new(SyncBridge::new(config.bridge.clone())?);
        let cache = Arc::new(FingerprintCache::new(config.cache.clone()));
        let sandbox = Arc::new(SandboxEngine::new(config.sandbox.clone()));

        let properties = match &config.properties.db_path {
            Some(path) => PropertyStore::open(path)?,
            None => PropertyStore::open_in_memory()?,
        };

        let mut deps = ServiceDeps::new(bridge, properties);
        if let Some(source) = token_source(&config)? {
            deps = deps.with_tokens(Arc::new(TokenManager::new(source)));
        }

        let registry = ServiceRegistry::new(sandbox, cache);
        register_defaults(&registry, &deps)?;

        info!(
            strict = config.sandbox.strict,
            cache = config.cache.enabled,
            auth = deps.tokens.as_ref().map(|t| t.source_name()).unwrap_or("none"),
            persistent_properties = config.properties.db_path.is_some(),
            "runtime ready"
        );

        Ok(Self {
            config,
            registry,
            deps,
        })
    }

    /// Load configuration from the environment and assemble.
    pub fn from_env() -> Result<Self> {
        Self::from_config(RuntimeConfig::load()?)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// The published service `name`.
    pub fn service(&self, name: &str) -> Result<ServiceHandle> {
        Ok(self.registry.service(name)?)
    }

    pub fn sandbox(&self) -> &Arc<SandboxEngine> {
        self.registry.sandbox()
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        self.registry.cache()
    }

    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.deps.bridge
    }

    /// The drive backing store, for direct inspection.
    pub fn drive(&self) -> &Arc<LocalDrive> {
        &self.deps.drive
    }

    pub fn tokens(&self) -> Option<&Arc<TokenManager>> {
        self.deps.tokens.as_ref()
    }

    /// Trash every resource created during this session.
    pub fn trash(&self) -> TrashReport {
        let report = self.registry.trash();
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "session teardown incomplete");
        }
        report
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("services", &self.registry.registered())
            .field("loaded", &self.registry.loaded())
            .field("bridge", &self.deps.bridge)
            .finish()
    }
}

fn token_source(config: &RuntimeConfig) -> Result<Option<Arc<dyn TokenSource>>> {
    if let Some(token) = &config.auth.access_token {
        return Ok(Some(Arc::new(StaticTokenSource::new(token.clone()))));
    }
    match &config.auth.oauth {
        Some(oauth) => Ok(Some(Arc::new(RefreshTokenSource::new(oauth.clone())?))),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Global accessor
// ---------------------------------------------------------------------------

/// Assemble a runtime from `config` and publish it process-wide.
///
/// Only the first call succeeds; later calls return
/// [`RuntimeError::AlreadyInitialized`] without building anything.
pub fn init(config: RuntimeConfig) -> Result<&'static Runtime> {
    if GLOBAL.get().is_some() {
        return Err(RuntimeError::AlreadyInitialized);
    }
    let runtime = Runtime::from_config(config)?;
    GLOBAL
        .set(runtime)
        .map_err(|_| RuntimeError::AlreadyInitialized)?;
    GLOBAL.get().ok_or(RuntimeError::AlreadyInitialized)
}

/// The published runtime, if [`init`] has run.
pub fn global() -> Option<&'static Runtime> {
    GLOBAL.get()
}
