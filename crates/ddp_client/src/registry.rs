//! Concurrency-safe keyed tables.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// A map that many threads may read while one writes.
///
/// Closures passed to [`with`](Self::with) and friends run under the lock
/// and must not call back into the same store.
pub(crate) struct KeyedStore<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V> KeyedStore<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.write().insert(key, value)
    }

    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.write().remove(key)
    }

    /// Removes the entry only if `predicate` holds, atomically.
    pub(crate) fn remove_if<Q>(&self, key: &Q, predicate: impl FnOnce(&V) -> bool) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut map = self.map.write();
        if map.get(key).is_some_and(predicate) {
            map.remove(key)
        } else {
            None
        }
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.read().len()
    }

    pub(crate) fn with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).map(f)
    }

    pub(crate) fn with_mut<Q, R>(&self, key: &Q, f: impl FnOnce(&mut V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.write().get_mut(key).map(f)
    }

    /// Keys of every entry matching `predicate`.
    pub(crate) fn keys_where(&self, predicate: impl Fn(&K, &V) -> bool) -> Vec<K> {
        self.map
            .read()
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn any(&self, predicate: impl Fn(&K, &V) -> bool) -> bool {
        self.map.read().iter().any(|(k, v)| predicate(k, v))
    }

    /// Maps every entry under one read lock.
    pub(crate) fn collect<R>(&self, f: impl Fn(&K, &V) -> Option<R>) -> Vec<R> {
        self.map.read().iter().filter_map(|(k, v)| f(k, v)).collect()
    }

    pub(crate) fn drain(&self) -> Vec<(K, V)> {
        self.map.write().drain().collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedStore<K, V> {
    /// Returns the existing value or inserts the one built by `make`.
    pub(crate) fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        if let Some(value) = self.map.read().get(&key) {
            return value.clone();
        }
        self.map.write().entry(key).or_insert_with(make).clone()
    }
}

impl<K: Eq + Hash + Clone, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
