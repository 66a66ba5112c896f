//! Sharded Map Implementation
//!
//! Concurrent hashmap split into power-of-two shards, each behind its own
//! `parking_lot::RwLock`, so readers of different keys rarely contend.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CACHE_LINE_SIZE;

/// Single shard containing a hashmap and its entry count
#[repr(C)]
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicUsize,
    /// Padding to prevent false sharing
    _padding: [u8; CACHE_LINE_SIZE - 16],
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
            _padding: [0; CACHE_LINE_SIZE - 16],
        }
    }

    /// Number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a clone of a value
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let old = self.map.write().insert(key, value);
        if old.is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove a value, returning it if present
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.map.write().remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove a value only if `remove_if` holds for it under the write lock
    pub fn remove_if<Q, F>(&self, key: &Q, remove_if: F) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).map(remove_if).unwrap_or(false) {
            return None;
        }
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove entries matching `drop_if`, returning them
    pub fn drain_where<F>(&self, mut drop_if: F) -> Vec<(K, V)>
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        let mut guard = self.map.write();
        let doomed: Vec<K> = guard
            .iter()
            .filter(|(k, v)| drop_if(k, v))
            .map(|(k, _)| k.clone())
            .collect();

        let mut drained = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some(value) = guard.remove(&key) {
                drained.push((key, value));
            }
        }
        self.count.store(guard.len(), Ordering::Relaxed);
        drained
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Sharded map with a power-of-two shard count
pub struct ShardedMap<K, V, const N: usize = 64> {
    shards: Box<[Shard<K, V>]>,
    hasher: std::collections::hash_map::RandomState,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "shard count must be a power of two");
        let shards: Vec<Shard<K, V>> = (0..N).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            hasher: Default::default(),
        }
    }

    #[inline]
    pub const fn shard_count(&self) -> usize {
        N
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Get a reference to a specific shard
    #[inline]
    pub fn shard(&self, index: usize) -> &Shard<K, V> {
        &self.shards[index & (N - 1)]
    }
}

impl<K: Eq + Hash, V, const N: usize> ShardedMap<K, V, N> {
    #[inline]
    fn shard_for<Q>(&self, key: &Q) -> &Shard<K, V>
    where
        Q: Hash + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash as usize) & (N - 1)]
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).contains_key(key)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard_for(&key).insert(key, value)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).remove(key)
    }

    pub fn remove_if<Q, F>(&self, key: &Q, remove_if: F) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        self.shard_for(key).remove_if(key, remove_if)
    }

    /// Remove every entry, returning the removed entries
    pub fn drain(&self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        self.shards
            .iter()
            .flat_map(|s| s.drain_where(|_, _| true))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
