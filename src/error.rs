//! Error types shared by loaders, the registry, and call sites.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::identity::LoaderIdentity;
use crate::storage::StorageError;

/// A batch executor call failed. Every waiter of the failed batch receives a
/// clone of the same error; the failure is not cached.
#[derive(Debug, Clone, Error)]
#[error("batch executor failed: {source}")]
pub struct ExecutorError {
    source: Arc<dyn StdError + Send + Sync>,
}

impl ExecutorError {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: Arc::from(source.into()),
        }
    }

    /// The underlying error, if it is of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }
}

impl From<StorageError> for ExecutorError {
    fn from(err: StorageError) -> Self {
        Self::new(err)
    }
}

/// A direct (non-batched) lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

impl NotFoundError {
    pub fn new(entity: &'static str, id: impl ToString) -> Self {
        Self {
            entity,
            id: id.to_string(),
        }
    }
}

/// The same loader identity was requested with a different key or value
/// type than the loader already registered under it. This is always a bug in
/// how the identity was built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("loader identity {identity} is registered as {registered}, requested as {requested}")]
pub struct IdentityCollisionError {
    pub identity: LoaderIdentity,
    pub registered: &'static str,
    pub requested: &'static str,
}

/// Errors surfaced by entity call sites.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    IdentityCollision(#[from] IdentityCollisionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for call-site resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;
