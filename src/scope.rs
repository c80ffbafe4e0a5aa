//! Request scope lifecycle: the two hooks a transport layer calls.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::config::LoaderConfig;
use crate::registry::LoaderRegistry;

/// Creates request scopes. Shared by the whole process; holds no per-request
/// state other than the configuration handed to new scopes.
#[derive(Debug)]
pub struct Scopes {
    config: ArcSwap<LoaderConfig>,
    next_id: AtomicU64,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl Scopes {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> LoaderConfig {
        **self.config.load()
    }

    /// Replace the configuration. Scopes that are already running keep the
    /// configuration they started with.
    pub fn reconfigure(&self, config: LoaderConfig) {
        debug!(?config, "loader configuration replaced");
        self.config.store(Arc::new(config));
    }

    /// Start a request: create a fresh, empty loader registry.
    pub fn on_request_start(&self) -> RequestScope {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let config = self.config();

        debug!(scope = id, "request scope started");
        RequestScope {
            id,
            registry: LoaderRegistry::new(config),
        }
    }

    /// End a request: discard its registry, every loader in it, and every
    /// cached value. A load future that outlives its scope still settles
    /// with its batch, but nothing it loads is cached anywhere.
    pub fn on_request_end(&self, scope: RequestScope) {
        debug!(scope = scope.id, loaders = scope.registry.len(), "request scope ended");
        drop(scope);
    }
}

/// One logical request's loaders. Pass it (or an `Arc` of it) down to every
/// call site that resolves entities for this request.
#[derive(Debug)]
pub struct RequestScope {
    id: u64,
    registry: LoaderRegistry,
}

impl RequestScope {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }
}

impl Deref for RequestScope {
    type Target = LoaderRegistry;

    fn deref(&self) -> &LoaderRegistry {
        &self.registry
    }
}
