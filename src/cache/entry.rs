//! Stored Entry Types
//!
//! Entries held by the in-process tier: pipeline bytes plus the access
//! statistics used for expiry and capacity eviction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Access statistics for an entry
#[derive(Debug)]
pub struct EntryMetadata {
    /// Creation time
    created_at: Instant,
    /// Expiry deadline (None = no expiry)
    expires_at: Option<Instant>,
    /// Last access, in milliseconds since `created_at`
    last_access_ms: AtomicU64,
    /// Access count for frequency-weighted eviction
    access_count: AtomicU32,
}

impl EntryMetadata {
    pub fn new(ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            last_access_ms: AtomicU64::new(0),
            access_count: AtomicU32::new(1),
        }
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        let since = self.created_at.elapsed().as_millis() as u64;
        self.last_access_ms.store(since, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Time since the last recorded access
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Calculate eviction score (higher = more likely to evict)
    ///
    /// Idle time divided by access frequency (LRU-K flavoured).
    pub fn eviction_score(&self) -> f64 {
        if self.is_expired() {
            return f64::MAX;
        }
        let idle = self.idle().as_secs_f64();
        let frequency = self.access_count() as f64;
        idle / (frequency + 1.0)
    }
}

/// An entry in the in-process tier
#[derive(Debug)]
pub struct StoredEntry {
    pub metadata: EntryMetadata,
    data: Bytes,
}

impl StoredEntry {
    pub fn new(data: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            metadata: EntryMetadata::new(ttl),
            data,
        }
    }

    /// Stored bytes (zero-copy clone)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = StoredEntry::new(Bytes::from_static(b"abc"), None);
        assert!(!entry.is_expired());
        assert_eq!(entry.size(), 3);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = StoredEntry::new(Bytes::from_static(b"abc"), Some(Duration::from_millis(5)));
        assert!(!entry.is_expired());
        std::thread::sleep(Duration::from_millis(15));
        assert!(entry.is_expired());
        assert_eq!(entry.metadata.eviction_score(), f64::MAX);
    }

    #[test]
    fn test_access_tracking() {
        let meta = EntryMetadata::new(None);
        assert_eq!(meta.access_count(), 1);
        assert_eq!(meta.record_access(), 2);
        assert_eq!(meta.record_access(), 3);
    }

    #[test]
    fn test_frequent_entries_score_lower() {
        let cold = EntryMetadata::new(None);
        let hot = EntryMetadata::new(None);
        for _ in 0..50 {
            hot.record_access();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(hot.eviction_score() < cold.eviction_score());
    }
}
