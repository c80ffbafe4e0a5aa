//! In-memory row source for tests and examples.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{instrument, trace};

use super::{Row, RowQuery, RowSource, StorageError, StorageResult};
use crate::identity::Scalar;
use crate::loader::lock;

/// In-memory implementation of [`RowSource`].
///
/// Rows are returned in insertion order. Every fetch is counted and its
/// query recorded, and the source can be told to fail the next N fetches,
/// which makes it easy to assert on round-trips and retries.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: RwLock<HashMap<&'static str, Vec<Row>>>,
    fetches: AtomicUsize,
    failures_left: AtomicUsize,
    queries: Mutex<Vec<RowQuery>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register an empty table, so queries against it return no rows rather
    /// than `UnknownTable`.
    pub fn create_table(&self, table: &'static str) {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(table)
            .or_default();
    }

    pub fn insert(&self, table: &'static str, row: Row) {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(table)
            .or_default()
            .push(row);
    }

    /// Number of `fetch_rows` calls so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Every query received so far, in order.
    pub fn queries(&self) -> Vec<RowQuery> {
        lock(&self.queries).clone()
    }

    /// Make the next `count` fetches fail with `StorageError::Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

fn matches_filter(row: &Row, column: &str, value: &Scalar) -> bool {
    row.get(column) == value
}

#[async_trait]
impl RowSource for MemoryRowSource {
    #[instrument(skip(self), fields(table = query.table, keys = query.keys.len()))]
    async fn fetch_rows(&self, query: RowQuery) -> StorageResult<Vec<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        lock(&self.queries).push(query.clone());

        if self.take_failure() {
            return Err(StorageError::Unavailable {
                message: "injected failure".to_owned(),
            });
        }

        let tables = self
            .tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let table = |name: &'static str| {
            tables
                .get(name)
                .ok_or_else(|| StorageError::UnknownTable {
                    table: name.to_owned(),
                })
        };
        let rows = table(query.table)?;

        let candidates: Vec<Row> = match &query.join {
            None => rows.clone(),
            Some(join) => {
                let joined = table(join.table)?;
                rows.iter()
                    .flat_map(|row| {
                        let references = row.get(join.references);
                        joined
                            .iter()
                            .filter(move |other| {
                                !references.is_null() && other.get(join.column) == references
                            })
                            .map(move |other| row.joined(join, other))
                    })
                    .collect()
            }
        };

        let keys: HashSet<&Scalar> = query.keys.iter().collect();
        let found: Vec<Row> = candidates
            .into_iter()
            .filter(|row| keys.contains(row.get(query.key_column)))
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(column, value)| matches_filter(row, column, value))
            })
            .collect();

        trace!(rows = found.len(), "fetched rows");
        Ok(found)
    }
}
