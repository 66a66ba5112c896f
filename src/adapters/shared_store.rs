//! Shared Memory Store
//!
//! Stand-in for a shared remote tier. Hand the same `Arc` to several caches
//! to model processes sharing one remote key-value store.
//! Uses DashMap for lock-free concurrent access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::domain::ports::Store;
use crate::error::{Error, Result};

/// Shared store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedStoreStats {
    /// Keys currently stored
    pub object_count: u64,
    /// Read operations (single or batched)
    pub reads: u64,
    /// Write operations (single or batched)
    pub writes: u64,
    /// Delete operations (single, batched or clear)
    pub deletes: u64,
}

/// DashMap-backed store with operation counters
pub struct SharedMemoryStore {
    name: String,
    storage: DashMap<String, Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    failing: AtomicBool,
}

impl SharedMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail, simulating an unreachable remote
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Check for a key without counting a read
    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains_key(key)
    }

    /// Raw stored bytes without counting a read
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.storage.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn stats(&self) -> SharedStoreStats {
        SharedStoreStats {
            object_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Store {
                store: self.name.clone(),
                reason: format!("{} failed: store unavailable", op),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SharedMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check("get")?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|v| v.clone()))
    }

    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        self.check("get_all")?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(keys
            .iter()
            .filter_map(|key| self.storage.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.check("put")?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_all(&self, entries: HashMap<String, Bytes>) -> Result<()> {
        self.check("put_all")?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        for (key, value) in entries {
            self.storage.insert(key, value);
        }
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.check("evict")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.storage.remove(key);
        Ok(())
    }

    async fn evict_all(&self, keys: &[String]) -> Result<()> {
        self.check("evict_all")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        for key in keys {
            self.storage.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check("clear")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.storage.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_batched_operations_count_once() {
        let store = SharedMemoryStore::new("remote");
        let entries: HashMap<String, Bytes> = (0..3)
            .map(|i| (format!("k{}", i), Bytes::from(vec![i as u8])))
            .collect();
        store.put_all(entries).await.unwrap();

        let keys: Vec<String> = (0..4).map(|i| format!("k{}", i)).collect();
        let found = store.get_all(&keys).await.unwrap();
        assert_eq!(found.len(), 3);

        let stats = store.stats();
        assert_eq!(stats.object_count, 3);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
    }

    #[tokio::test]
    async fn test_failing_store_reports_store_error() {
        let store = SharedMemoryStore::new("remote");
        store.set_failing(true);
        let err = store.put("k", Bytes::from_static(b"v")).await.unwrap_err();
        assert_matches!(err, Error::Store { ref store, .. } if store == "remote");

        store.set_failing(false);
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.contains("k"));
    }

    #[test]
    fn test_peek_does_not_count_reads() {
        let store = SharedMemoryStore::new("remote");
        tokio_test::block_on(store.put("k", Bytes::from_static(b"v"))).unwrap();

        assert_eq!(store.peek("k").unwrap().as_ref(), b"v");
        assert_eq!(store.stats().reads, 0);

        let read = tokio_test::block_on(store.get("k")).unwrap();
        assert!(read.is_some());
        assert_eq!(store.stats().reads, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SharedMemoryStore::new("remote");
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.stats().deletes, 1);
    }
}
