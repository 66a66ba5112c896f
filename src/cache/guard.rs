//! Stampede Guard
//!
//! Per-key mutual exclusion for load-through sections. Concurrent misses on
//! one key serialize behind a single lock, so only the first holder reaches
//! the loader and the rest find the tiers already populated.
//!
//! Lock entries are reference counted by holder: created on first
//! acquisition and dropped from the registry once the last handle goes away.
//! Exclusion is in-process only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct LockEntry {
    mutex: Mutex<()>,
    holders: AtomicUsize,
}

/// Registry of per-key locks, owned by one cache instance
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    locks: DashMap<String, Arc<LockEntry>>,
}

impl KeyLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a counted reference to the lock for `key`.
    ///
    /// The reference is released when the handle is dropped, whether or not
    /// the lock itself was ever taken.
    pub fn acquire(&self, key: &str) -> LockHandle<'_> {
        let entry = {
            let slot = self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(LockEntry::default()));
            // Incremented under the shard lock so release cannot race removal
            slot.holders.fetch_add(1, Ordering::AcqRel);
            Arc::clone(slot.value())
        };

        LockHandle {
            registry: self,
            key: key.to_string(),
            entry,
        }
    }

    fn release(&self, key: &str, entry: &LockEntry) {
        if entry.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.locks
                .remove_if(key, |_, e| e.holders.load(Ordering::Acquire) == 0);
        }
    }

    /// Keys with at least one live handle
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Counted reference to one key's lock
#[must_use = "dropping the handle releases it immediately"]
pub struct LockHandle<'a> {
    registry: &'a KeyLockRegistry,
    key: String,
    entry: Arc<LockEntry>,
}

impl<'a> LockHandle<'a> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the lock with no deadline
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.entry.mutex.lock().await
    }

    /// Wait for the lock, giving up after `timeout`
    pub async fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_, ()>> {
        tokio::time::timeout(timeout, self.entry.mutex.lock())
            .await
            .map_err(|_| Error::LockTimeout {
                key: self.key.clone(),
                waited: timeout,
            })
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.entry.mutex.try_lock().ok()
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key, &self.entry);
    }
}

impl std::fmt::Debug for LockHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("holders", &self.entry.holders.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_entry_removed_after_last_release() {
        let registry = KeyLockRegistry::new();
        let a = registry.acquire("k");
        let b = registry.acquire("k");
        assert_eq!(registry.len(), 1);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let registry = KeyLockRegistry::new();
        let first = registry.acquire("k");
        let second = registry.acquire("k");

        let guard = first.try_lock().unwrap();
        assert!(second.try_lock().is_none());
        drop(guard);
        assert!(second.try_lock().is_some());
    }

    #[test]
    fn test_keys_do_not_contend() {
        let registry = KeyLockRegistry::new();
        let a = registry.acquire("a");
        let b = registry.acquire("b");
        let _ga = a.try_lock().unwrap();
        assert!(b.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let registry = KeyLockRegistry::new();
        let holder = registry.acquire("k");
        let _held = holder.lock().await;

        let waiter = registry.acquire("k");
        let err = waiter
            .lock_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_matches!(err, Error::LockTimeout { ref key, .. } if key == "k");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_serializes_critical_sections() {
        let registry = Arc::new(KeyLockRegistry::new());
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let handle = registry.acquire("hot");
                    let _guard = handle.lock().await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
