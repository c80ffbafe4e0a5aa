//! Data structures for passing keys into and values out of a batch executor.

use std::collections::hash_map::{Entry, HashMap};
use std::collections::HashSet;
use std::hash::Hash;
use std::mem;

/// Anything that can be used as a loader key: typically an `i64` entity id
/// or a newtype around one. Keys are deduplicated by equality.
pub trait Key: Send + Sync + Hash + Eq + Clone + 'static {}
impl<T: Send + Sync + Hash + Eq + Clone + 'static> Key for T {}

/// What to do when `values_from_rows` sees the same key twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDuplicate {
    /// Keep the first row for a key, ignore the rest.
    Ignore,
    /// Later rows replace earlier ones.
    #[default]
    Replace,
}

/// The set of keys passed into a batch executor. Use the `keys` method to
/// get the keys, all of which will be unique, so that you can execute your
/// query. Then use one of the `into_values`/`values_from_*`/`group_rows`
/// methods to turn your response data into a [`ValueSet`], which is handed
/// back to the loader.
#[derive(Debug)]
pub struct KeySet<K: Key> {
    keys: HashSet<K>,
}

impl<K: Key> KeySet<K> {
    pub(crate) fn new() -> Self {
        Self {
            keys: HashSet::new(),
        }
    }

    /// Add a key to this set. Returns false if it was already present.
    pub(crate) fn insert(&mut self, key: K) -> bool {
        self.keys.insert(key)
    }

    /// Take the keyset out of this particular &mut self instance, replacing it
    /// with an empty set. Helper method for when a batch is dispatched.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            keys: mem::take(&mut self.keys),
        }
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of unique keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Get an iterator over all the keys in this keyset. These are guaranteed
    /// to be:
    ///
    /// - Unique
    /// - Between 1 and the configured max batch size of the loader
    /// - In an arbitrary order
    pub fn keys(&self) -> impl Iterator<Item = &K> + Clone {
        self.keys.iter()
    }

    /// Pair every key with a value computed from it.
    pub fn into_values<V>(self, mut get_value: impl FnMut(&K) -> V) -> ValueSet<K, V> {
        let values = self
            .keys
            .into_iter()
            .map(move |key| {
                let value = get_value(&key);
                (key, value)
            })
            .collect();

        ValueSet { values }
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<V, E>(
        self,
        mut get_value: impl FnMut(&K) -> Result<V, E>,
    ) -> Result<ValueSet<K, V>, E> {
        let values = self
            .keys
            .into_iter()
            .map(move |key| {
                let value = get_value(&key)?;
                Ok((key, value))
            })
            .collect::<Result<HashMap<K, V>, E>>()?;

        Ok(ValueSet { values })
    }

    /// Build a single-value result from a key → value map. Requested keys
    /// missing from the map resolve to `None`; keys in the map that were
    /// never requested are dropped.
    pub fn values_from_map<V>(self, mut found: HashMap<K, V>) -> ValueSet<K, Option<V>> {
        self.into_values(move |key| found.remove(key))
    }

    /// Build a single-value result from rows, extracting each row's key with
    /// `key_of`. Same absence rules as [`values_from_map`](Self::values_from_map).
    pub fn values_from_rows<V>(
        self,
        on_duplicate: OnDuplicate,
        rows: impl IntoIterator<Item = V>,
        mut key_of: impl FnMut(&V) -> K,
    ) -> ValueSet<K, Option<V>> {
        let mut found: HashMap<K, V> = HashMap::new();

        for row in rows {
            let key = key_of(&row);
            if !self.keys.contains(&key) {
                continue;
            }

            match (found.entry(key), on_duplicate) {
                (Entry::Vacant(entry), _) => {
                    entry.insert(row);
                }
                (Entry::Occupied(mut entry), OnDuplicate::Replace) => {
                    entry.insert(row);
                }
                (Entry::Occupied(..), OnDuplicate::Ignore) => {}
            }
        }

        self.values_from_map(found)
    }

    /// Build a multi-value result by grouping rows on the key returned by
    /// `group_of`. Rows keep the order they arrived in. A requested key with
    /// no rows maps to an empty `Vec`; rows whose grouping column is null, or
    /// whose group was never requested, are dropped.
    pub fn group_rows<V>(
        self,
        rows: impl IntoIterator<Item = V>,
        mut group_of: impl FnMut(&V) -> Option<K>,
    ) -> ValueSet<K, Vec<V>> {
        let pairs = rows
            .into_iter()
            .filter_map(move |row| group_of(&row).map(|group| (group, row)));

        self.group_pairs(pairs)
    }

    /// Like [`group_rows`](Self::group_rows), for rows that arrive already
    /// paired with their group, such as rows read through a relationship
    /// table.
    pub fn group_pairs<V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> ValueSet<K, Vec<V>> {
        let mut groups: HashMap<K, Vec<V>> = HashMap::with_capacity(self.keys.len());

        for (group, row) in pairs {
            if self.keys.contains(&group) {
                groups.entry(group).or_default().push(row);
            }
        }

        self.into_values(move |key| groups.remove(key).unwrap_or_default())
    }
}

/// A value set is an opaque data structure that contains the result of a batch
/// operation. It is created with one of the [`KeySet`] methods, which
/// guarantees that it has precisely one value for every requested key.
#[derive(Debug)]
pub struct ValueSet<K: Key, V> {
    values: HashMap<K, V>,
}

impl<K: Key, V> ValueSet<K, V> {
    pub(crate) fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
