//! Reference services for the appvirt kernel.
//!
//! - **[`drive`]** -- [`LocalDrive`], an in-memory folder and file store.
//! - **[`properties`]** -- [`PropertiesService`], key/value stores persisted
//!   through the bridge.
//! - **[`url_fetch`]** -- [`UrlFetchService`], authenticated HTTP.
//!
//! [`register_defaults`] publishes all three on a registry.

mod args;
pub mod drive;
pub mod properties;
pub mod url_fetch;

use std::sync::Arc;

use appvirt_auth::TokenManager;
use appvirt_bridge::{HttpTransport, SyncBridge};
use appvirt_kernel::{Result, Service, ServiceRegistry, factory};
use appvirt_store::PropertyStore;

pub use drive::{DRIVE_SERVICE, LocalDrive, ROOT_FOLDER_ID};
pub use properties::{PROPERTIES_SERVICE, PropertiesService};
pub use url_fetch::{URL_FETCH_SERVICE, UrlFetchService};

/// Collaborators the reference services are built from.
#[derive(Clone)]
pub struct ServiceDeps {
    pub bridge: Arc<SyncBridge>,
    pub properties: PropertyStore,
    pub tokens: Option<Arc<TokenManager>>,
    /// The drive backing store.  Shared so that it outlives any one
    /// registry and can be inspected directly.
    pub drive: Arc<LocalDrive>,
}

impl ServiceDeps {
    pub fn new(bridge: Arc<SyncBridge>, properties: PropertyStore) -> Self {
        Self {
            bridge,
            properties,
            tokens: None,
            drive: Arc::new(LocalDrive::new()),
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenManager>) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

/// Register `Drive`, `Properties` and `UrlFetch` on `registry`.
///
/// Nothing is constructed until a service is first touched.
pub fn register_defaults(registry: &ServiceRegistry, deps: &ServiceDeps) -> Result<()> {
    let drive = Arc::clone(&deps.drive);
    registry.register(
        DRIVE_SERVICE,
        factory(move || Ok(Arc::clone(&drive) as Arc<dyn Service>)),
    )?;

    let (store, bridge) = (deps.properties.clone(), Arc::clone(&deps.bridge));
    registry.register(
        PROPERTIES_SERVICE,
        factory(move || {
            Ok(Arc::new(PropertiesService::new(store.clone(), Arc::clone(&bridge))) as Arc<dyn Service>)
        }),
    )?;

    let (bridge, tokens) = (Arc::clone(&deps.bridge), deps.tokens.clone());
    registry.register(
        URL_FETCH_SERVICE,
        factory(move || {
            let transport = HttpTransport::new(Arc::clone(&bridge));
            Ok(Arc::new(UrlFetchService::new(transport, tokens.clone())) as Arc<dyn Service>)
        }),
    )?;

    tracing::debug!(services = ?registry.registered(), "reference services registered");
    Ok(())
}
