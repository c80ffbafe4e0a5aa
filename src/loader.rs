use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::future::{self, BoxFuture, FutureExt, TryJoinAll};
use tracing::{debug, trace, warn};

use crate::{
    config::LoaderConfig,
    data::{Key, KeySet, ValueSet},
    error::ExecutorError,
    executor::BatchExecutor,
    identity::LoaderIdentity,
    wakerset::{Token as WakerToken, WakerSet},
};

/// All mutexes in this crate are only held for the duration of a poll or a
/// `load` call. A panic while one is held can't leave the protected state
/// half-updated in a way that matters to other waiters, so poisoning is
/// ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AccumulatingState<K: Key> {
    keys: KeySet<K>,
    window: Option<BoxFuture<'static, ()>>,
    wakers: WakerSet,
}

struct RunningState<K: Key, V> {
    fut: BoxFuture<'static, Result<ValueSet<K, V>, ExecutorError>>,
    // A copy of the dispatched keys, so that they can be evicted from the
    // cache if the batch fails.
    keys: Vec<K>,
    wakers: WakerSet,
}

enum State<K: Key, V> {
    Accum(AccumulatingState<K>),
    Running(RunningState<K, V>),
    Done(Result<ValueSet<K, V>, ExecutorError>),
}

impl<K: Key, V> State<K, V> {
    fn name(&self) -> &'static str {
        match self {
            State::Accum(..) => "accumulating",
            State::Running(..) => "running",
            State::Done(Ok(..)) => "settled",
            State::Done(Err(..)) => "failed",
        }
    }
}

/// One batch: the keys collected in one window, the executor call that
/// fetches them, and, once settled, the shared result for every key in it.
/// Every cache entry for those keys points at the same batch.
struct Batch<K: Key, V> {
    identity: Arc<LoaderIdentity>,
    executor: Arc<dyn BatchExecutor<K, V>>,
    state: State<K, V>,
}

type SharedBatch<K, V> = Arc<Mutex<Batch<K, V>>>;

struct LoaderState<K: Key, V> {
    cache: HashMap<K, SharedBatch<K, V>>,

    // The batch currently accepting keys. Weak, because the cache already
    // owns it through the entries of its keys.
    current: Weak<Mutex<Batch<K, V>>>,
}

struct LoaderInner<K: Key, V> {
    identity: Arc<LoaderIdentity>,
    executor: Arc<dyn BatchExecutor<K, V>>,
    config: LoaderConfig,
    state: Mutex<LoaderState<K, V>>,
}

impl<K: Key, V> LoaderInner<K, V> {
    /// Remove the cache entries of a failed batch, so that the next `load`
    /// of those keys is retried in a new batch. Entries that no longer point
    /// at `batch` are left alone.
    fn forget_failed(&self, keys: &[K], batch: &SharedBatch<K, V>) {
        let mut guard = lock(&self.state);

        for key in keys {
            if guard
                .cache
                .get(key)
                .map_or(false, |cached| Arc::ptr_eq(cached, batch))
            {
                guard.cache.remove(key);
            }
        }
    }
}

/// A loader for one [`LoaderIdentity`]. Each call to [`load`](Self::load)
/// returns a [`LoadFuture`] for a single key; all keys requested before the
/// batch window closes are fetched with a single [`BatchExecutor`] call, and
/// each future resolves to the value for its own key.
///
/// Successful results are cached for the lifetime of the loader, which is
/// meant to be one request: loading the same key again never calls the
/// executor again. Failed batches are not cached.
///
/// `KeyedLoader` is a cheap handle; clones share the same cache.
pub struct KeyedLoader<K: Key, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K: Key, V> Clone for KeyedLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Key, V> Debug for KeyedLoader<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLoader")
            .field("identity", &self.inner.identity)
            .field("config", &self.inner.config)
            .field("cached_keys", &self.cached_keys())
            .finish()
    }
}

impl<K: Key, V> KeyedLoader<K, V> {
    pub fn identity(&self) -> &LoaderIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Number of keys that are cached, in flight, or waiting for dispatch.
    pub fn cached_keys(&self) -> usize {
        lock(&self.inner.state).cache.len()
    }
}

impl<K, V> KeyedLoader<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    pub fn new(
        identity: LoaderIdentity,
        config: LoaderConfig,
        executor: impl BatchExecutor<K, V> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                identity: Arc::new(identity),
                executor: Arc::new(executor),
                config,
                state: Mutex::new(LoaderState {
                    cache: HashMap::new(),
                    current: Weak::new(),
                }),
            }),
        }
    }

    /// Request the value for a single key.
    ///
    /// - If the key is already cached (settled or in flight), the returned
    ///   future shares that result.
    /// - Otherwise the key is added to the batch that is currently
    ///   accumulating, or a new batch is started.
    pub fn load(&self, key: K) -> LoadFuture<K, V> {
        let loader = Arc::downgrade(&self.inner);
        let mut guard = lock(&self.inner.state);

        if let Some(batch) = guard.cache.get(&key) {
            trace!(loader = %self.inner.identity, "cache hit");
            return LoadFuture::new(key, Arc::clone(batch), loader);
        }

        // If there is a current batch, and it's still accumulating, add the
        // key to it. Note that at no point do we check the window; we assume
        // that if it has closed, the next poll of the driving future will
        // dispatch the batch.
        if let Some(batch) = guard.current.upgrade() {
            let mut batch_guard = lock(&batch);
            let joined = match &mut batch_guard.state {
                State::Accum(state) => {
                    state.keys.insert(key.clone());

                    // If we've hit the key limit, close the window and
                    // make sure the driver notices.
                    let full = matches!(
                        self.inner.config.max_batch_size,
                        Some(max) if state.keys.len() >= max.get()
                    );
                    if full {
                        state.window = None;
                        state.wakers.wake_driver();
                    }
                    Some(full)
                }
                _ => None,
            };
            drop(batch_guard);

            if let Some(full) = joined {
                if full {
                    guard.current = Weak::new();
                }
                guard.cache.insert(key.clone(), Arc::clone(&batch));
                return LoadFuture::new(key, batch, loader);
            }
        }

        let mut keys = KeySet::new();
        keys.insert(key.clone());

        let full = matches!(self.inner.config.max_batch_size, Some(max) if max.get() <= 1);
        let window = if full {
            None
        } else {
            Some(self.inner.config.window.open())
        };

        let batch = Arc::new(Mutex::new(Batch {
            identity: Arc::clone(&self.inner.identity),
            executor: Arc::clone(&self.inner.executor),
            state: State::Accum(AccumulatingState {
                keys,
                window,
                wakers: WakerSet::default(),
            }),
        }));

        if !full {
            guard.current = Arc::downgrade(&batch);
        }
        guard.cache.insert(key.clone(), Arc::clone(&batch));

        LoadFuture::new(key, batch, loader)
    }

    /// Request several keys at once. The values come back in the same order
    /// as `keys`; duplicate keys share one entry. All of the keys are
    /// requested before this method returns, so they share a batch.
    pub fn load_many<I>(&self, keys: I) -> TryJoinAll<LoadFuture<K, V>>
    where
        I: IntoIterator<Item = K>,
    {
        future::try_join_all(keys.into_iter().map(|key| self.load(key)))
    }
}

/// A request for a single key's value, created by [`KeyedLoader::load`].
///
/// Only one of the futures waiting on a batch (the "driver") polls the batch
/// window and then the executor future; the others are woken when the batch
/// settles, or when the driver is dropped and one of them has to take over.
pub struct LoadFuture<K: Key, V> {
    key: K,
    waker_token: Option<WakerToken>,
    batch: Option<SharedBatch<K, V>>,
    loader: Weak<LoaderInner<K, V>>,
}

// The key is never pinned; all shared state lives behind the Arc.
impl<K: Key, V> Unpin for LoadFuture<K, V> {}

impl<K: Key, V> LoadFuture<K, V> {
    fn new(key: K, batch: SharedBatch<K, V>, loader: Weak<LoaderInner<K, V>>) -> Self {
        Self {
            key,
            waker_token: None,
            batch: Some(batch),
            loader,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Key + Debug, V> Debug for LoadFuture<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match self.batch.as_ref() {
            Some(batch) => lock(batch).state.name(),
            None => "complete",
        };

        f.debug_struct("LoadFuture")
            .field("key", &self.key)
            .field("state", &state)
            .finish()
    }
}

impl<K, V> Future for LoadFuture<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    type Output = Result<V, ExecutorError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        let batch = Arc::clone(
            unpinned
                .batch
                .as_ref()
                .expect("Can't re-poll a completed LoadFuture"),
        );

        // Note about this mutex: it is only held for the duration of this
        // poll, never across an await.
        let mut guard = lock(&batch);
        let Batch {
            identity,
            executor,
            state,
        } = &mut *guard;

        let mut failed_keys = None;

        if let State::Accum(accum) = state {
            // Only the driver polls the window. Everyone else waits to be
            // woken when the batch settles (or when they're promoted).
            if !accum.wakers.register(&mut unpinned.waker_token, ctx.waker()) {
                return Poll::Pending;
            }

            if let Some(window) = accum.window.as_mut() {
                if window.as_mut().poll(ctx).is_pending() {
                    return Poll::Pending;
                }
            }

            // The window is closed. Freeze the key set and start the
            // executor call.
            let wakers = mem::take(&mut accum.wakers);
            let keys = accum.keys.take();
            let requested: Vec<K> = keys.keys().cloned().collect();

            let fut: BoxFuture<'static, Result<ValueSet<K, V>, ExecutorError>> = if keys.is_empty() {
                future::ready(Ok(ValueSet::empty())).boxed()
            } else {
                debug!(loader = %identity, keys = requested.len(), "dispatching batch");
                let executor = Arc::clone(executor);
                async move { executor.execute(keys).await }.boxed()
            };

            *state = State::Running(RunningState {
                fut,
                keys: requested,
                wakers,
            });
        }

        if let State::Running(running) = state {
            if !running
                .wakers
                .register(&mut unpinned.waker_token, ctx.waker())
            {
                return Poll::Pending;
            }

            let result = match running.fut.as_mut().poll(ctx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result,
            };

            // Now that we have a result, signal all the waiting futures to
            // wake up so they can get their results. We're about to return
            // ours, so we don't need to wake ourselves.
            running.wakers.wake_all_except(unpinned.waker_token.take());

            match &result {
                Ok(values) => {
                    debug!(loader = %identity, values = values.len(), "batch settled")
                }
                Err(err) => {
                    warn!(
                        loader = %identity,
                        keys = running.keys.len(),
                        error = %err,
                        "batch failed; keys will be retried on next load"
                    );
                    failed_keys = Some(mem::take(&mut running.keys));
                }
            }

            *state = State::Done(result);
        }

        let output = match state {
            State::Done(Ok(values)) => match values.get(&unpinned.key) {
                Some(value) => Ok(value.clone()),
                None => panic!("Unknown logic error: no value in ValueSet for a key in its batch"),
            },
            State::Done(Err(err)) => Err(err.clone()),
            State::Accum(..) | State::Running(..) => {
                unreachable!("LoadFuture observed an unsettled batch")
            }
        };

        drop(guard);
        unpinned.waker_token = None;
        unpinned.batch = None;

        if let Some(keys) = failed_keys {
            if let Some(loader) = unpinned.loader.upgrade() {
                loader.forget_failed(&keys, &batch);
            }
        }

        Poll::Ready(output)
    }
}

impl<K: Key, V> Drop for LoadFuture<K, V> {
    fn drop(&mut self) {
        // An important thing to remember when dropping a LoadFuture: the
        // shared batch is only ever being driven by a single task. If this
        // was the driver, another waiter has to be woken to take over. That
        // logic is handled by the WakerSet.
        //
        // The key itself stays in the batch; other futures (or a later load
        // of the same key) may still be waiting on it.
        if let (Some(batch), Some(token)) = (self.batch.as_ref(), self.waker_token.take()) {
            let mut guard = lock(batch);
            match &mut guard.state {
                State::Accum(state) => state.wakers.discard_and_wake(token),
                State::Running(state) => state.wakers.discard_and_wake(token),
                State::Done(..) => {}
            }
        }
    }
}
