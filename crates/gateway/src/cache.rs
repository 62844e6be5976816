//! Response caches. The gateway only talks to the `Cache` trait so a size or TTL
//! policy can replace `UnboundedCache` without touching callers.

#![forbid(unsafe_code)]

use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;

pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: K, value: V);
    /// Insert `value` unless `key` is present; return whichever value is stored.
    fn get_or_insert(&self, key: K, value: V) -> V;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Session-lifetime cache; never evicts.
pub struct UnboundedCache<K, V> {
    map: Mutex<FxHashMap<K, V>>,
}

impl<K, V> Default for UnboundedCache<K, V> {
    fn default() -> Self { Self { map: Mutex::new(FxHashMap::default()) } }
}

impl<K, V> UnboundedCache<K, V> {
    pub fn new() -> Self { Self::default() }
}

impl<K, V> Cache<K, V> for UnboundedCache<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).insert(key, value);
    }

    fn get_or_insert(&self, key: K, value: V) -> V {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(value)
            .clone()
    }

    fn len(&self) -> usize { self.map.lock().unwrap_or_else(PoisonError::into_inner).len() }
}
