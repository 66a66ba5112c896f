//! Containment Predicates
//!
//! Existence checks consulted on a full miss before any loader runs.

use dashmap::{DashMap, DashSet};

use crate::domain::ports::ContainmentPredicate;

/// Default predicate: every key may exist upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContainmentPredicate for AllowAll {
    fn test(&self, _cache_name: &str, _key: &str) -> bool {
        true
    }
}

/// Predicate backed by an explicit set of store keys per cache.
///
/// Keys never registered are reported as absent upstream, so the loader is
/// skipped for them.
#[derive(Debug, Default)]
pub struct KnownKeys {
    caches: DashMap<String, DashSet<String>>,
}

impl KnownKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store key as existing upstream
    pub fn insert(&self, cache_name: &str, key: impl Into<String>) {
        self.caches
            .entry(cache_name.to_string())
            .or_default()
            .insert(key.into());
    }

    /// Forget a store key
    pub fn remove(&self, cache_name: &str, key: &str) -> bool {
        self.caches
            .get(cache_name)
            .map(|keys| keys.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Number of keys registered for a cache
    pub fn len(&self, cache_name: &str) -> usize {
        self.caches.get(cache_name).map(|k| k.len()).unwrap_or(0)
    }
}

impl ContainmentPredicate for KnownKeys {
    fn test(&self, cache_name: &str, key: &str) -> bool {
        self.caches
            .get(cache_name)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.test("users", "anything"));
    }

    #[test]
    fn test_known_keys_scoped_per_cache() {
        let known = KnownKeys::new();
        known.insert("users", "u:1");

        assert!(known.test("users", "u:1"));
        assert!(!known.test("users", "u:2"));
        assert!(!known.test("orders", "u:1"));
        assert_eq!(known.len("users"), 1);

        assert!(known.remove("users", "u:1"));
        assert!(!known.test("users", "u:1"));
    }
}
