//! The batch executor contract: one storage round-trip for a set of keys.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::data::{Key, KeySet, ValueSet};
use crate::error::ExecutorError;

/// Fetches values for a whole batch of keys at once.
///
/// The [`KeySet`] is never empty and its keys come in no particular order.
/// Implementations should not mutate shared state outside of their return
/// value; a successful result is cached by the loader for the rest of the
/// request, a failure is handed to every waiter of the batch and then
/// forgotten.
///
/// The returned future is polled while its batch is locked, so an executor
/// must never load from the loader it belongs to: that load would wait on
/// the same lock and deadlock. Loading from other loaders is fine.
#[async_trait]
pub trait BatchExecutor<K: Key, V: Send + 'static>: Send + Sync {
    async fn execute(&self, keys: KeySet<K>) -> Result<ValueSet<K, V>, ExecutorError>;
}

/// Adapts an async closure `Fn(KeySet<K>) -> Future<Output = Result<ValueSet<K, V>, ExecutorError>>`
/// into a [`BatchExecutor`].
pub struct BatchFn<F, K, V> {
    batcher: F,
    _types: PhantomData<fn(K) -> V>,
}

/// Wrap a closure as a [`BatchExecutor`].
pub fn batch_fn<F, Fut, K, V>(batcher: F) -> BatchFn<F, K, V>
where
    K: Key,
    V: Send + 'static,
    F: Fn(KeySet<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValueSet<K, V>, ExecutorError>> + Send + 'static,
{
    BatchFn {
        batcher,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, K, V> BatchExecutor<K, V> for BatchFn<F, K, V>
where
    K: Key,
    V: Send + 'static,
    F: Fn(KeySet<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ValueSet<K, V>, ExecutorError>> + Send + 'static,
{
    async fn execute(&self, keys: KeySet<K>) -> Result<ValueSet<K, V>, ExecutorError> {
        (self.batcher)(keys).await
    }
}
