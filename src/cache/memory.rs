//! Memory Store - In-Process Tier
//!
//! Low latency tier backed by a sharded hashmap. Typically tier 0 of a
//! cascade, rebuilt from misses after a restart.
//!
//! # Design
//!
//! - ShardedMap with per-shard `parking_lot::RwLock`
//! - Optional per-entry TTL; expired entries read as misses and are dropped
//! - Byte-capacity bound with high/low watermark eviction, most idle and
//!   least frequently used entries first

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::entry::StoredEntry;
use super::shard::ShardedMap;
use super::DEFAULT_MEMORY_CAPACITY;
use crate::domain::ports::Store;
use crate::error::Result;

/// Memory store configuration
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// Entry time-to-live (None = until evicted)
    pub ttl: Option<Duration>,
    /// High watermark fraction (trigger eviction)
    pub high_watermark: f64,
    /// Low watermark fraction (stop eviction)
    pub low_watermark: f64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
            ttl: None,
            high_watermark: 0.90,
            low_watermark: 0.80,
        }
    }
}

/// In-process tier
pub struct MemoryStore {
    name: String,
    storage: ShardedMap<String, Arc<StoredEntry>>,
    config: MemoryStoreConfig,
    current_size: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryStore {
    /// Create with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MemoryStoreConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: MemoryStoreConfig) -> Self {
        Self {
            name: name.into(),
            storage: ShardedMap::new(),
            config,
            current_size: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a live entry, dropping it if it has expired
    pub fn get_sync(&self, key: &str) -> Option<Bytes> {
        let entry = self.storage.get(key)?;
        if entry.is_expired() {
            // Only drop the entry we saw; a concurrent put may have replaced it
            if let Some(removed) = self
                .storage
                .remove_if(key, |current| Arc::ptr_eq(current, &entry))
            {
                self.current_size
                    .fetch_sub(removed.size(), Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        entry.metadata.record_access();
        Some(entry.data().clone())
    }

    /// Store a value, returning false if it exceeds the capacity.
    ///
    /// A rejected value still drops any previous entry for the key, so a read
    /// falls through to a slower tier instead of serving the old value.
    pub fn put_sync(&self, key: &str, value: Bytes) -> bool {
        let entry = StoredEntry::new(value, self.config.ttl);
        let size = entry.size();

        if size > self.config.capacity {
            self.remove_sync(key);
            debug!(store = %self.name, key, size, "Value exceeds capacity, not cached");
            return false;
        }

        match self.storage.insert(key.to_string(), Arc::new(entry)) {
            Some(old) => {
                self.current_size.fetch_sub(old.size(), Ordering::Relaxed);
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
        }

        if self.should_evict() {
            self.evict();
        }
        true
    }

    pub fn remove_sync(&self, key: &str) -> bool {
        match self.storage.remove(key) {
            Some(removed) => {
                self.current_size
                    .fetch_sub(removed.size(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Check for a live entry without recording an access
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Number of entries (including not yet purged expired ones)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Bytes currently held
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Entries evicted for capacity or expiry
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    fn fill_ratio(&self) -> f64 {
        self.current_size.load(Ordering::Relaxed) as f64 / self.config.capacity as f64
    }

    fn should_evict(&self) -> bool {
        self.fill_ratio() >= self.config.high_watermark
    }

    /// Evict entries until low watermark is reached
    fn evict(&self) {
        let mut candidates: Vec<(String, f64)> = Vec::new();
        for i in 0..self.storage.shard_count() {
            for (key, entry) in self.storage.shard(i).entries() {
                candidates.push((key, entry.metadata.eviction_score()));
            }
        }

        // Highest score first = most evictable
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut evicted = 0u64;
        for (key, _) in candidates {
            if self.fill_ratio() <= self.config.low_watermark {
                break;
            }
            if self.remove_sync(&key) {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(store = %self.name, evicted, size = self.size(), "Memory store eviction pass");
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_sync(key))
    }

    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        Ok(keys
            .iter()
            .filter_map(|key| self.get_sync(key).map(|v| (key.clone(), v)))
            .collect())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.put_sync(key, value);
        Ok(())
    }

    async fn put_all(&self, entries: HashMap<String, Bytes>) -> Result<()> {
        for (key, value) in entries {
            self.put_sync(&key, value);
        }
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.remove_sync(key);
        Ok(())
    }

    async fn evict_all(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove_sync(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let freed: u64 = self
            .storage
            .drain()
            .iter()
            .map(|(_, entry)| entry.size())
            .sum();
        self.current_size.fetch_sub(freed, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
