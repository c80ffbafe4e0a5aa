//! Per-request registry of loaders, keyed by [`LoaderIdentity`].

use std::any::{type_name, Any};
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::sync::Mutex;

use tracing::debug;

use crate::config::LoaderConfig;
use crate::data::Key;
use crate::error::IdentityCollisionError;
use crate::executor::BatchExecutor;
use crate::identity::LoaderIdentity;
use crate::loader::{lock, KeyedLoader};

struct RegisteredLoader {
    loader: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Resolves loader identities to loader instances for one request scope.
///
/// Equal identities always get the same [`KeyedLoader`] (and so the same
/// cache); distinct identities never share one. Loaders are created lazily,
/// on the first request for their identity, and live as long as the
/// registry.
pub struct LoaderRegistry {
    config: LoaderConfig,
    loaders: Mutex<HashMap<LoaderIdentity, RegisteredLoader>>,
}

impl Debug for LoaderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let loaders = lock(&self.loaders);
        f.debug_struct("LoaderRegistry")
            .field("config", &self.config)
            .field("loaders", &loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl LoaderRegistry {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration given to loaders created by
    /// [`get_or_create`](Self::get_or_create).
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Get the loader registered under `identity`, or create one with an
    /// executor built by `factory`. The factory is only called when the
    /// loader doesn't exist yet; it must not call back into this registry.
    ///
    /// Fails if `identity` is already registered for a loader with different
    /// key or value types.
    pub fn get_or_create<K, V, E, F>(
        &self,
        identity: LoaderIdentity,
        factory: F,
    ) -> Result<KeyedLoader<K, V>, IdentityCollisionError>
    where
        K: Key,
        V: Clone + Send + 'static,
        E: BatchExecutor<K, V> + 'static,
        F: FnOnce() -> E,
    {
        self.get_or_create_with(identity, self.config, factory)
    }

    /// Same as [`get_or_create`](Self::get_or_create), but a newly created
    /// loader uses `config` instead of the registry's configuration. An
    /// existing loader keeps the configuration it was created with.
    pub fn get_or_create_with<K, V, E, F>(
        &self,
        identity: LoaderIdentity,
        config: LoaderConfig,
        factory: F,
    ) -> Result<KeyedLoader<K, V>, IdentityCollisionError>
    where
        K: Key,
        V: Clone + Send + 'static,
        E: BatchExecutor<K, V> + 'static,
        F: FnOnce() -> E,
    {
        let requested = type_name::<KeyedLoader<K, V>>();
        let mut loaders = lock(&self.loaders);

        match loaders.entry(identity) {
            Entry::Occupied(entry) => {
                let registered = entry.get();
                registered
                    .loader
                    .downcast_ref::<KeyedLoader<K, V>>()
                    .cloned()
                    .ok_or_else(|| IdentityCollisionError {
                        identity: entry.key().clone(),
                        registered: registered.type_name,
                        requested,
                    })
            }
            Entry::Vacant(entry) => {
                let loader = KeyedLoader::new(entry.key().clone(), config, factory());
                debug!(loader = %entry.key(), "created loader");

                entry.insert(RegisteredLoader {
                    loader: Box::new(loader.clone()),
                    type_name: requested,
                });
                Ok(loader)
            }
        }
    }

    pub fn contains(&self, identity: &LoaderIdentity) -> bool {
        lock(&self.loaders).contains_key(identity)
    }

    /// Number of loaders created so far.
    pub fn len(&self) -> usize {
        lock(&self.loaders).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.loaders).is_empty()
    }
}
