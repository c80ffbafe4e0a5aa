//! These tests ensure that dropped futures correctly update the shared state
use cooked_waker::{IntoWaker, WakeRef};
use futures::{executor, future, FutureExt};
use graphloader::{batch_fn, ExecutorError, KeySet, KeyedLoader, LoaderConfig, LoaderIdentity, ValueSet};
use std::{
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

/// A Waker that does nothing. Used for when we're manually calling poll.
#[derive(Debug, Default, Copy, Clone)]
struct NoOpWaker;

impl WakeRef for NoOpWaker {
    fn wake_by_ref(&self) {}
}

/// Returns pending the first N times it is polled, then Ready.
#[derive(Debug, Clone)]
struct Skipper {
    remaining_skips: usize,
}

impl Future for Skipper {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.get_mut().remaining_skips {
            0 => Poll::Ready(()),
            skips => {
                *skips -= 1;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

/// Testing async function: put a copy of each key in an Arc in the result.
/// This lets us count how many copies of a value are alive.
async fn put_keys_in_arc<T: Copy + Eq + Hash + Send + Sync + 'static>(
    keys: KeySet<T>,
) -> Result<ValueSet<T, Arc<T>>, ExecutorError> {
    Ok(keys.into_values(|key| Arc::new(*key)))
}

/// This test establishes a baseline behavior for our clone counters
#[test]
fn test_simple_drop_after_resolution() {
    let loader = KeyedLoader::new(
        LoaderIdentity::new("arcs"),
        LoaderConfig::default(),
        batch_fn(put_keys_in_arc::<i32>),
    );

    let fut1 = loader.load(1);
    let fut2 = loader.load(1);
    let fut3 = loader.load(1);
    let fut4 = loader.load(1);

    let res1 = executor::block_on(fut1).unwrap();

    // At this point, the cached result and our local fut1 result should both
    // have an Arc
    assert_eq!(Arc::strong_count(&res1), 2);

    // Resolving fut2 simply clones the underlying Arc
    let res2 = executor::block_on(fut2).unwrap();
    assert_eq!(Arc::strong_count(&res2), 3);

    // Dropping the remaining futures shouldn't change anything; the loader's
    // cache still holds the settled batch
    drop(fut3);
    drop(fut4);
    assert_eq!(Arc::strong_count(&res1), 3);

    // A later load is served from the cache
    let res3 = executor::block_on(loader.load(1)).unwrap();
    assert_eq!(Arc::strong_count(&res1), 4);
    drop(res3);

    // Dropping the loader drops the cache, and with it the shared value
    drop(loader);
    assert_eq!(Arc::strong_count(&res1), 2);
}

#[test]
fn test_drop_during_delay() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    // Dropping a future never takes its key out of the batch: keys 1, 2 and
    // 3 are all fetched
    let loader = KeyedLoader::new(
        LoaderIdentity::new("identity"),
        LoaderConfig::default().with_delay(Duration::from_millis(10)),
        batch_fn(move |keys: KeySet<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(keys.len(), 3);

                let mut keys_vec: Vec<i32> = keys.keys().copied().collect();
                keys_vec.sort_unstable();
                assert_eq!(keys_vec, [1, 2, 3]);

                Ok::<_, ExecutorError>(keys.into_values(|key| *key))
            }
        }),
    );

    let waker = Arc::new(NoOpWaker).into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = loader.load(1);
    let fut11 = loader.load(1);
    let fut2 = loader.load(2);
    let fut3 = loader.load(3);

    // This poll makes fut1 the driver. We'll drop futures in this phase, then
    // confirm that the batch is unaffected.
    assert!(fut1.poll_unpin(&mut ctx).is_pending());

    drop(fut11);
    drop(fut3);

    let result: i32 = executor::block_on(fut1).unwrap();
    assert_eq!(result, 1);

    let result: i32 = executor::block_on(fut2).unwrap();
    assert_eq!(result, 2);

    // The dropped key was still fetched and cached
    let result: i32 = executor::block_on(loader.load(3)).unwrap();
    assert_eq!(result, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_while_executor_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let loader = KeyedLoader::new(
        LoaderIdentity::new("slow"),
        LoaderConfig::default(),
        batch_fn(move |keys: KeySet<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Skipper { remaining_skips: 1 }.await;
                Ok::<_, ExecutorError>(keys.into_values(|key| key * 10))
            }
        }),
    );

    let waker = Arc::new(NoOpWaker).into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = loader.load(1);
    let mut fut2 = loader.load(2);

    // First poll: the yield window
    assert!(fut1.poll_unpin(&mut ctx).is_pending());
    assert!(fut2.poll_unpin(&mut ctx).is_pending());

    // Second poll: dispatched, stuck in the skipper
    assert!(fut1.poll_unpin(&mut ctx).is_pending());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Every waiter goes away while the executor call is in flight
    drop(fut1);
    drop(fut2);

    // The batch is still cached, so a later load picks up the in-flight call
    // instead of starting another one
    let results = executor::block_on(future::join(loader.load(1), loader.load(2)));
    assert_eq!(results.0.unwrap(), 10);
    assert_eq!(results.1.unwrap(), 20);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abandoned_batch_is_driven_by_later_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let loader = KeyedLoader::new(
        LoaderIdentity::new("abandoned"),
        LoaderConfig::default().with_delay(Duration::from_millis(10)),
        batch_fn(move |keys: KeySet<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok::<_, ExecutorError>(keys.into_values(|key| key + 100)))
        }),
    );

    let waker = Arc::new(NoOpWaker).into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = loader.load(1);
    let fut2 = loader.load(2);
    assert!(fut1.poll_unpin(&mut ctx).is_pending());

    // Every waiter leaves while the batch is still collecting keys
    drop(fut1);
    drop(fut2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(loader.cached_keys(), 2);

    // Loading one of its keys picks the batch up and drives it
    let result: i32 = executor::block_on(loader.load(2)).unwrap();
    assert_eq!(result, 102);

    let result: i32 = executor::block_on(loader.load(1)).unwrap();
    assert_eq!(result, 101);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
