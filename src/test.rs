#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use futures::task::noop_waker_ref;
use futures::{executor, future, FutureExt};

use crate::{
    batch_fn, BatchExecutor, BatchWindow, ExecutorError, KeySet, KeyedLoader, LoaderConfig, LoaderIdentity,
    ValueSet,
};

/// Stringifies its keys and records every batch it receives. Fails as long
/// as `failures` is above zero.
#[derive(Debug, Default, Clone)]
struct Recorder {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
    failures: Arc<AtomicUsize>,
}

impl Recorder {
    fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().unwrap().clone()
    }

    fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn loader(&self, config: LoaderConfig) -> KeyedLoader<u32, String> {
        KeyedLoader::new(LoaderIdentity::new("stringify"), config, self.clone())
    }
}

#[async_trait]
impl BatchExecutor<u32, String> for Recorder {
    async fn execute(&self, keys: KeySet<u32>) -> Result<ValueSet<u32, String>, ExecutorError> {
        let mut batch: Vec<u32> = keys.keys().copied().collect();
        batch.sort_unstable();
        self.batches.lock().unwrap().push(batch);

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            Err(ExecutorError::new("storage unavailable"))
        } else {
            Ok(keys.into_values(|key| key.to_string()))
        }
    }
}

#[test]
fn simple_test() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let fut1 = loader.load(10);
    let fut2 = loader.load(20);

    let (res1, res2) = executor::block_on(future::join(fut1, fut2));

    assert_eq!(res1.unwrap(), "10");
    assert_eq!(res2.unwrap(), "20");
    assert_eq!(recorder.batches(), [[10, 20]]);
}

#[test]
fn test_duplicate_keys() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let futs = vec![loader.load(10), loader.load(10), loader.load(20), loader.load(10)];
    let results: Vec<String> = executor::block_on(future::join_all(futs))
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results, ["10", "10", "20", "10"]);
    assert_eq!(recorder.batches(), [[10, 20]]);
    assert_eq!(loader.cached_keys(), 2);
}

#[test]
fn settled_values_are_cached() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    assert_eq!(executor::block_on(loader.load(1)).unwrap(), "1");
    assert_eq!(executor::block_on(loader.load(1)).unwrap(), "1");
    assert_eq!(executor::block_on(loader.load_many(vec![1, 1])).unwrap(), ["1", "1"]);

    assert_eq!(recorder.calls(), 1);
}

#[test]
fn failed_batch_is_shared_then_retried() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());
    recorder.fail_next(1);

    let (res1, res2) = executor::block_on(future::join(loader.load(1), loader.load(2)));
    let err1 = res1.unwrap_err();
    let err2 = res2.unwrap_err();
    assert_eq!(err1.to_string(), "batch executor failed: storage unavailable");
    assert_eq!(err1.to_string(), err2.to_string());

    // Neither key is cached, so the next load goes back to the executor.
    assert_eq!(loader.cached_keys(), 0);
    assert_eq!(executor::block_on(loader.load(1)).unwrap(), "1");
    assert_eq!(recorder.batches(), [vec![1, 2], vec![1]]);
}

#[test]
fn awaiting_splits_batches() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let (a, b) = executor::block_on(async {
        let a = loader.load(1).await.unwrap();
        let b = loader.load(2).await.unwrap();
        (a, b)
    });

    assert_eq!((a.as_str(), b.as_str()), ("1", "2"));
    assert_eq!(recorder.batches(), [[1], [2]]);
}

#[test]
fn immediate_window_coalesces_before_first_poll() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default().with_window(BatchWindow::Immediate));

    let results = executor::block_on(loader.load_many(vec![3, 1, 2])).unwrap();

    assert_eq!(results, ["3", "1", "2"]);
    assert_eq!(recorder.batches(), [[1, 2, 3]]);
}

#[test]
fn delay_window_starts_at_first_load() {
    let recorder = Recorder::default();
    let window = BatchWindow::delay(Duration::from_millis(5));
    let loader = recorder.loader(LoaderConfig::default().with_window(window));

    let mut fut = loader.load(1);
    thread::sleep(Duration::from_millis(50));

    // The delay already ran out while nobody was polling
    let mut cx = Context::from_waker(noop_waker_ref());
    match fut.poll_unpin(&mut cx) {
        Poll::Ready(Ok(value)) => assert_eq!(value, "1"),
        other => panic!("expected the first poll to dispatch, got {:?}", other),
    }
    assert_eq!(recorder.calls(), 1);
}

#[test]
fn low_key_test() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default().with_max_batch_size(2));

    let results = executor::block_on(loader.load_many(vec![1, 2, 3, 4, 5])).unwrap();

    assert_eq!(results, ["1", "2", "3", "4", "5"]);
    assert_eq!(recorder.batches(), [vec![1, 2], vec![3, 4], vec![5]]);
}

#[test]
fn batch_size_of_one() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default().with_max_batch_size(1));

    let results = executor::block_on(loader.load_many(vec![1, 2, 1])).unwrap();

    assert_eq!(results, ["1", "2", "1"]);
    assert_eq!(recorder.batches(), [[1], [2]]);
}

#[test]
fn empty_load_many_skips_executor() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let results = executor::block_on(loader.load_many(Vec::<u32>::new())).unwrap();

    assert!(results.is_empty());
    assert_eq!(recorder.calls(), 0);
    assert_eq!(loader.cached_keys(), 0);
}

#[test]
fn executor_may_load_from_another_loader() {
    let recorder = Recorder::default();
    let names = recorder.loader(LoaderConfig::default());

    let lengths = KeyedLoader::new(
        LoaderIdentity::new("lengths"),
        LoaderConfig::default(),
        batch_fn(move |keys: KeySet<u32>| {
            let names = names.clone();
            async move {
                let ids: Vec<u32> = keys.keys().copied().collect();
                let found = names.load_many(ids.clone()).await?;
                let mut lengths: HashMap<u32, usize> =
                    ids.into_iter().zip(found.iter().map(String::len)).collect();

                Ok::<_, ExecutorError>(keys.into_values(|key| lengths.remove(key).unwrap_or_default()))
            }
        }),
    );

    let results = executor::block_on(lengths.load_many(vec![7, 42, 100])).unwrap();

    assert_eq!(results, [1, 2, 3]);
    assert_eq!(recorder.batches(), [[7, 42, 100]]);
}

#[test]
fn future_outlives_loader() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let fut = loader.load(7);
    drop(loader);

    assert_eq!(executor::block_on(fut).unwrap(), "7");
    assert_eq!(recorder.calls(), 1);
}

#[test]
fn debug_shows_batch_state() {
    let recorder = Recorder::default();
    let loader = recorder.loader(LoaderConfig::default());

    let fut = loader.load(7);
    assert!(format!("{:?}", fut).contains("accumulating"));
    assert!(format!("{:?}", loader).contains("stringify"));
}
