// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A read-biased concurrent map with shared-ownership values.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A hash map behind a readers-writer lock. Values are held as `Arc<V>` so a
/// handle returned by [`ConcurrentMap::find`] remains valid even if another
/// thread erases the entry before the handle is dropped.
///
/// The closures passed to [`ConcurrentMap::for_each`] and
/// [`ConcurrentMap::erase_if`] run with the corresponding lock held and must
/// not re-enter the same map.
pub struct ConcurrentMap<K, V> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the value for `key`. Returns `true` when the key was
    /// not previously present.
    pub fn insert(&self, key: K, value: Arc<V>) -> bool {
        self.inner.write().insert(key, value).is_none()
    }

    /// Look up `key`, returning a refcount-incremented handle to the value.
    pub fn find<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().get(key).cloned()
    }

    /// Remove `key`. Returns `true` when an entry was removed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.write().remove(key).is_some()
    }

    /// Remove every entry for which `pred` returns `true`, returning the
    /// number of entries removed. Holds the write lock for the full sweep.
    pub fn erase_if<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|k, v| !pred(k, v));
        before - map.len()
    }

    /// Visit every entry under the read lock.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &Arc<V>),
    {
        for (k, v) in self.inner.read().iter() {
            f(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Snapshot of the current key set.
    pub fn keys(&self) -> Vec<K> {
        self.inner.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn insert_find_remove() {
        let map = ConcurrentMap::new();
        assert!(map.is_empty());

        assert!(map.insert("a".to_string(), Arc::new(1u32)));
        assert!(!map.insert("a".to_string(), Arc::new(2u32)));
        assert_eq!(map.len(), 1);

        assert_eq!(map.find(&"a".to_string()).map(|v| *v), Some(2));
        assert!(map.find(&"b".to_string()).is_none());

        assert!(map.remove(&"a".to_string()));
        assert!(!map.remove(&"a".to_string()));
    }

    #[test]
    fn erase_if_and_keys() {
        let map = ConcurrentMap::new();
        for i in 0..10u32 {
            map.insert(i, Arc::new(i));
        }
        let erased = map.erase_if(|_, v| **v % 2 == 0);
        assert_eq!(erased, 5);
        let mut keys = map.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    // a handle returned by find() must remain usable after the entry is
    // erased by another thread
    #[test]
    fn handle_survives_erasure() {
        struct Flagged(Arc<AtomicBool>);
        impl Drop for Flagged {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let map = Arc::new(ConcurrentMap::new());
        map.insert("agv-1".to_string(), Arc::new(Flagged(dropped.clone())));

        let handle = map.find(&"agv-1".to_string()).unwrap();

        let other = map.clone();
        std::thread::spawn(move || {
            other.remove(&"agv-1".to_string());
        })
        .join()
        .unwrap();

        // the entry is gone but the value is still alive through our handle
        assert!(map.find(&"agv-1".to_string()).is_none());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(handle);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
