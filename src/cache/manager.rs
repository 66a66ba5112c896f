//! Cache Manager - Tiered Cache Orchestrator
//!
//! Public face of a cache instance. Encodes keys, records accesses for
//! refresh-ahead, delegates to the tier cascade, runs stampede-protected
//! load-through on misses, and announces completed writes to peers.
//!
//! ```text
//! get_or_load(k)
//!   └─ encode key ─▶ track access ─▶ cascade lookup ──hit──▶ value
//!                                        │ miss
//!                                        ▼
//!                    containment? ──no──▶ store empty (if negative caching)
//!                                        │ yes
//!                                        ▼
//!                    lock(key) ─▶ re-check tiers ─▶ loader ─▶ write through ─▶ PUT
//! ```

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::builder::CacheConfig;
use super::guard::KeyLockRegistry;
use super::levels::{TierLayout, TieredStore};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::refresh::{RefreshConsumer, RefreshOutcome, RefreshTracker};
use super::sync::{SyncConsumer, SyncNotifier};
use crate::domain::events::SyncOp;
use crate::domain::ports::{CacheLoader, MessageHandler, Store};
use crate::domain::value::CacheValue;
use crate::error::{Error, Result};

/// A tiered cache.
///
/// Cheap to clone; clones share the same instance. Background tasks stop on
/// [`Cache::close`] or when the last clone is dropped.
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<K, V> {
    config: CacheConfig<K, V>,
    tiers: TieredStore,
    guard: KeyLockRegistry,
    notifier: SyncNotifier,
    refresh: Option<Arc<RefreshTracker<K>>>,
    shutdown: CancellationToken,
}

impl<K, V> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Wire a validated configuration into a running cache
    pub(crate) fn start(config: CacheConfig<K, V>, stores: Vec<Arc<dyn Store>>) -> Result<Self> {
        let metrics = Arc::clone(&config.metrics);
        let tiers = TieredStore::new(stores, Arc::clone(&metrics))?;

        let needs_runtime = config.refresh.is_some() || config.subscriber.is_some();
        if needs_runtime && tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(format!(
                "cache {} needs a tokio runtime for refresh-ahead or sync subscription",
                config.name
            )));
        }

        let notifier = SyncNotifier::new(
            config.publisher.clone(),
            config.sync_channel.clone(),
            config.name.clone(),
            config.instance_id,
            Arc::clone(&metrics),
        );
        let refresh = config
            .refresh
            .clone()
            .map(|rc| Arc::new(RefreshTracker::new(rc, Arc::clone(&metrics))));
        let shutdown = CancellationToken::new();

        if let Some(subscriber) = &config.subscriber {
            let consumer = SyncConsumer::new(
                config.name.clone(),
                config.instance_id,
                Arc::clone(tiers.fastest()),
                Arc::clone(&metrics),
            );
            subscriber.register(
                &config.sync_channel,
                Arc::new(consumer) as Arc<dyn MessageHandler>,
                shutdown.child_token(),
            )?;
        }

        let inner = Arc::new(CacheInner {
            config,
            tiers,
            guard: KeyLockRegistry::new(),
            notifier,
            refresh,
            shutdown,
        });

        if let Some(tracker) = &inner.refresh {
            let weak = Arc::downgrade(&inner);
            let consumer: Weak<dyn RefreshConsumer<K>> = weak;
            tracker.set_consumer(consumer);
            Arc::clone(tracker).spawn_sweeper(inner.shutdown.child_token());
        }

        info!(
            cache = %inner.config.name,
            instance = %inner.config.instance_id,
            layout = %inner.tiers.layout(),
            channel = %inner.config.sync_channel,
            refresh = inner.refresh.is_some(),
            "Cache started"
        );
        Ok(Self { inner })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up a key across all tiers. Never invokes a loader.
    ///
    /// `None` is a miss; `Some(v)` with `!v.has_value()` is a cached empty.
    pub async fn get(&self, key: &K) -> Result<Option<CacheValue<V>>> {
        let store_key = self.inner.store_key(key, "get")?;
        self.inner.track(&store_key, key);
        self.inner.lookup(&store_key).await
    }

    /// Look up a key, loading it through the default loader on a miss.
    pub async fn get_or_load(&self, key: &K) -> Result<Option<CacheValue<V>>> {
        let loader = self.inner.default_loader("get_or_load")?;
        let store_key = self.inner.store_key(key, "get_or_load")?;
        self.inner.track(&store_key, key);
        self.inner.load_through(&store_key, key, loader.as_ref()).await
    }

    /// Look up a key, loading it through `loader` on a miss.
    pub async fn get_with(
        &self,
        key: &K,
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<Option<CacheValue<V>>> {
        let store_key = self.inner.store_key(key, "get_with")?;
        self.inner.track(&store_key, key);
        self.inner.load_through(&store_key, key, loader).await
    }

    /// Batched lookup. Keys missing from every tier are absent from the map.
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, CacheValue<V>>> {
        let pairs = self.inner.store_keys(keys, "get_all")?;
        self.inner.track_all(&pairs);
        self.inner.lookup_all(&pairs).await
    }

    /// Batched lookup with one batched load through the default loader.
    pub async fn get_or_load_all(&self, keys: &[K]) -> Result<HashMap<K, CacheValue<V>>> {
        let loader = self.inner.default_loader("get_or_load_all")?;
        let pairs = self.inner.store_keys(keys, "get_or_load_all")?;
        self.inner.track_all(&pairs);
        self.inner.load_all_through(&pairs, loader.as_ref()).await
    }

    /// Batched lookup with one batched load through `loader`.
    ///
    /// Batch loads are not lock protected; concurrent batches may load the
    /// same keys.
    pub async fn get_all_with(
        &self,
        keys: &[K],
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<HashMap<K, CacheValue<V>>> {
        let pairs = self.inner.store_keys(keys, "get_all_with")?;
        self.inner.track_all(&pairs);
        self.inner.load_all_through(&pairs, loader).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a value through every tier and announce PUT.
    ///
    /// `None` stores the empty sentinel when negative caching is enabled;
    /// otherwise the key is evicted everywhere and EVICT is announced.
    pub async fn put(&self, key: &K, value: impl Into<Option<V>>) -> Result<()> {
        let store_key = self.inner.store_key(key, "put")?;
        let value = value.into();
        match self.inner.config.pipeline.encode(value.as_ref())? {
            Some(stored) => {
                if value.is_none() {
                    self.inner.config.metrics.record_negative_store(1);
                }
                self.inner.tiers.put(&store_key, stored).await?;
                self.inner.notifier.notify(SyncOp::Put, vec![store_key]).await;
            }
            None => self.inner.evict_keys(vec![store_key]).await?,
        }
        Ok(())
    }

    /// Write several values through every tier and announce one PUT_ALL.
    pub async fn put_all(&self, entries: HashMap<K, V>) -> Result<()> {
        if entries.is_empty() {
            return Err(Error::invalid_argument("entries", "put_all"));
        }

        let mut stored = HashMap::with_capacity(entries.len());
        for (key, value) in &entries {
            let store_key = self.inner.store_key(key, "put_all")?;
            if let Some(bytes) = self.inner.config.pipeline.encode(Some(value))? {
                stored.insert(store_key, bytes);
            }
        }

        let keys: Vec<String> = stored.keys().cloned().collect();
        self.inner.tiers.put_all(stored).await?;
        self.inner.notifier.notify(SyncOp::PutAll, keys).await;
        Ok(())
    }

    /// Remove a key from every tier and announce EVICT.
    pub async fn evict(&self, key: &K) -> Result<()> {
        let store_key = self.inner.store_key(key, "evict")?;
        self.inner.evict_keys(vec![store_key]).await
    }

    /// Remove several keys from every tier and announce one EVICT_ALL.
    pub async fn evict_all(&self, keys: &[K]) -> Result<()> {
        let pairs = self.inner.store_keys(keys, "evict_all")?;
        let store_keys: Vec<String> = pairs.into_iter().map(|(sk, _)| sk).collect();
        self.inner.evict_keys(store_keys).await
    }

    /// Clear every tier and announce a single CLEAR.
    pub async fn clear(&self) -> Result<()> {
        self.inner.tiers.clear().await?;
        if let Some(tracker) = &self.inner.refresh {
            tracker.clear();
        }
        self.inner.notifier.notify_clear().await;
        info!(cache = %self.inner.config.name, "Cache cleared");
        Ok(())
    }

    // =========================================================================
    // Lifecycle & inspection
    // =========================================================================

    /// Stop the refresh sweep and the sync subscription.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            info!(cache = %self.inner.config.name, "Cache closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run one refresh sweep now, returning the number of keys reloaded.
    pub async fn refresh_now(&self) -> usize {
        match &self.inner.refresh {
            Some(tracker) => tracker.sweep().await,
            None => 0,
        }
    }

    /// Store keys tracked for refresh-ahead
    pub fn tracked_keys(&self) -> Vec<String> {
        self.inner
            .refresh
            .as_ref()
            .map(|t| t.tracked_keys())
            .unwrap_or_default()
    }

    /// Probe one tier without promotion
    pub async fn contains_in_tier(&self, key: &K, tier: usize) -> Result<bool> {
        let store_key = self.inner.store_key(key, "contains_in_tier")?;
        self.inner.tiers.contains_in_tier(&store_key, tier).await
    }

    /// Store key for an application key
    pub fn store_key(&self, key: &K) -> Result<String> {
        self.inner.store_key(key, "store_key")
    }

    pub fn tier(&self, index: usize) -> Option<Arc<dyn Store>> {
        self.inner.tiers.tier(index).cloned()
    }

    pub fn layout(&self) -> TierLayout {
        self.inner.tiers.layout()
    }

    pub fn config(&self) -> &CacheConfig<K, V> {
        &self.inner.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.config.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.inner.config.metrics)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.config.instance_id
    }

    pub fn sync_channel(&self) -> &str {
        &self.inner.config.sync_channel
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("tiers", &self.inner.tiers)
            .finish()
    }
}

// =============================================================================
// Internals
// =============================================================================

impl<K, V> CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn store_key(&self, key: &K, operation: &'static str) -> Result<String> {
        let encoded = self.config.key_codec.encode(key)?;
        if encoded.is_empty() {
            return Err(Error::invalid_argument("key", operation));
        }
        Ok(encoded)
    }

    /// Encode a key set, dropping duplicates
    fn store_keys(&self, keys: &[K], operation: &'static str) -> Result<Vec<(String, K)>> {
        if keys.is_empty() {
            return Err(Error::invalid_argument("keys", operation));
        }
        let mut seen = HashSet::with_capacity(keys.len());
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            let store_key = self.store_key(key, operation)?;
            if seen.insert(store_key.clone()) {
                pairs.push((store_key, key.clone()));
            }
        }
        Ok(pairs)
    }

    fn default_loader(&self, operation: &'static str) -> Result<Arc<dyn CacheLoader<K, V>>> {
        self.config
            .loader
            .clone()
            .ok_or_else(|| Error::invalid_argument("loader", operation))
    }

    fn track(&self, store_key: &str, key: &K) {
        if let Some(tracker) = &self.refresh {
            tracker.access(store_key, key);
        }
    }

    fn track_all(&self, pairs: &[(String, K)]) {
        if let Some(tracker) = &self.refresh {
            tracker.access_all(pairs.iter().map(|(sk, k)| (sk.as_str(), k)));
        }
    }

    async fn lookup(&self, store_key: &str) -> Result<Option<CacheValue<V>>> {
        match self.tiers.get(store_key).await? {
            Some(stored) => Ok(Some(self.config.pipeline.decode(&stored)?)),
            None => Ok(None),
        }
    }

    async fn lookup_all(&self, pairs: &[(String, K)]) -> Result<HashMap<K, CacheValue<V>>> {
        let store_keys: Vec<String> = pairs.iter().map(|(sk, _)| sk.clone()).collect();
        let found = self.tiers.get_all(&store_keys).await?;

        let mut values = HashMap::with_capacity(found.len());
        for (store_key, key) in pairs {
            if let Some(stored) = found.get(store_key) {
                values.insert(key.clone(), self.config.pipeline.decode(stored)?);
            }
        }
        Ok(values)
    }

    /// Stampede-protected single-key load-through
    #[instrument(skip(self, key, loader), fields(cache = %self.config.name))]
    async fn load_through(
        &self,
        store_key: &str,
        key: &K,
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<Option<CacheValue<V>>> {
        if let Some(found) = self.lookup(store_key).await? {
            return Ok(Some(found));
        }

        if !self.config.containment.test(&self.config.name, store_key) {
            self.config.metrics.record_containment_rejection(1);
            debug!(key = store_key, "Containment rejected key, skipping loader");
            return self.write_back(store_key, None).await;
        }

        let handle = self.guard.acquire(store_key);
        let _lock = match self.config.load_lock_timeout {
            Some(timeout) => handle.lock_timeout(timeout).await.map_err(|e| {
                self.config.metrics.record_lock_timeout();
                e
            })?,
            None => handle.lock().await,
        };

        // Another holder may have populated the tiers while we waited
        if let Some(found) = self.lookup(store_key).await? {
            return Ok(Some(found));
        }

        self.load_and_store(store_key, key, loader).await
    }

    async fn load_and_store(
        &self,
        store_key: &str,
        key: &K,
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<Option<CacheValue<V>>> {
        let started = Instant::now();
        let loaded = loader.load(key).await.map_err(|source| {
            self.config.metrics.record_load_failure();
            Error::Load {
                key: store_key.to_string(),
                source,
            }
        })?;
        self.config.metrics.record_load(started.elapsed());
        debug!(key = store_key, found = loaded.is_some(), "Loaded from source");

        self.write_back(store_key, loaded).await
    }

    /// Write a loaded (or rejected) value through every tier.
    ///
    /// Returns the lookup result the caller should see.
    async fn write_back(&self, store_key: &str, value: Option<V>) -> Result<Option<CacheValue<V>>> {
        let Some(stored) = self.config.pipeline.encode(value.as_ref())? else {
            return Ok(None);
        };
        if value.is_none() {
            self.config.metrics.record_negative_store(1);
        }
        self.tiers.put(store_key, stored).await?;
        self.notifier
            .notify(SyncOp::Put, vec![store_key.to_string()])
            .await;
        Ok(Some(CacheValue::from(value)))
    }

    /// Batched load-through: one lookup, one load, one write-back
    #[instrument(skip(self, pairs, loader), fields(cache = %self.config.name, keys = pairs.len()))]
    async fn load_all_through(
        &self,
        pairs: &[(String, K)],
        loader: &dyn CacheLoader<K, V>,
    ) -> Result<HashMap<K, CacheValue<V>>> {
        let mut values = self.lookup_all(pairs).await?;

        let mut allowed: Vec<&(String, K)> = Vec::new();
        let mut rejected: Vec<&(String, K)> = Vec::new();
        for pair in pairs.iter().filter(|(_, k)| !values.contains_key(k)) {
            if self.config.containment.test(&self.config.name, &pair.0) {
                allowed.push(pair);
            } else {
                rejected.push(pair);
            }
        }
        if allowed.is_empty() && rejected.is_empty() {
            return Ok(values);
        }

        let sentinel: Option<Bytes> = self.config.pipeline.null_sentinel().cloned();
        let mut stored: HashMap<String, Bytes> = HashMap::new();
        let mut negatives = 0u64;

        if !rejected.is_empty() {
            self.config
                .metrics
                .record_containment_rejection(rejected.len() as u64);
            if let Some(sentinel) = &sentinel {
                for (store_key, key) in &rejected {
                    stored.insert(store_key.clone(), sentinel.clone());
                    values.insert(key.clone(), CacheValue::empty());
                    negatives += 1;
                }
            }
        }

        if !allowed.is_empty() {
            let keys: Vec<K> = allowed.iter().map(|(_, k)| k.clone()).collect();
            let started = Instant::now();
            let mut loaded = loader.load_all(&keys).await.map_err(|source| {
                self.config.metrics.record_load_failure();
                Error::Load {
                    key: allowed
                        .iter()
                        .map(|(sk, _)| sk.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                    source,
                }
            })?;
            self.config.metrics.record_load(started.elapsed());
            debug!(requested = keys.len(), found = loaded.len(), "Batch loaded from source");

            for (store_key, key) in allowed {
                match loaded.remove(key) {
                    Some(value) => {
                        if let Some(bytes) = self.config.pipeline.encode(Some(&value))? {
                            stored.insert(store_key.clone(), bytes);
                        }
                        values.insert(key.clone(), CacheValue::of(value));
                    }
                    None => {
                        if let Some(sentinel) = &sentinel {
                            stored.insert(store_key.clone(), sentinel.clone());
                            values.insert(key.clone(), CacheValue::empty());
                            negatives += 1;
                        }
                    }
                }
            }
        }

        if negatives > 0 {
            self.config.metrics.record_negative_store(negatives);
        }
        if !stored.is_empty() {
            let keys: Vec<String> = stored.keys().cloned().collect();
            self.tiers.put_all(stored).await?;
            self.notifier.notify(SyncOp::PutAll, keys).await;
        }
        Ok(values)
    }

    /// Evict through every tier, stop tracking and announce
    async fn evict_keys(&self, store_keys: Vec<String>) -> Result<()> {
        let op = if store_keys.len() == 1 {
            self.tiers.evict(&store_keys[0]).await?;
            SyncOp::Evict
        } else {
            self.tiers.evict_all(&store_keys).await?;
            SyncOp::EvictAll
        };
        if let Some(tracker) = &self.refresh {
            tracker.remove_all(&store_keys);
        }
        self.notifier.notify(op, store_keys).await;
        Ok(())
    }
}

#[async_trait]
impl<K, V> RefreshConsumer<K> for CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn reload(&self, store_key: &str, key: &K) -> RefreshOutcome {
        let Some(loader) = self.config.loader.clone() else {
            return RefreshOutcome::Failed;
        };

        let handle = self.guard.acquire(store_key);
        let Some(_lock) = handle.try_lock() else {
            return RefreshOutcome::Contended;
        };

        let result = if self.config.containment.test(&self.config.name, store_key) {
            self.load_and_store(store_key, key, loader.as_ref()).await
        } else {
            self.config.metrics.record_containment_rejection(1);
            self.write_back(store_key, None).await
        };

        // Absent upstream with nothing stored: drop the stale copy
        let result = match result {
            Ok(None) => {
                debug!(key = store_key, "Refreshed key absent upstream, evicting");
                self.evict_keys(vec![store_key.to_string()]).await
            }
            Ok(Some(_)) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => RefreshOutcome::Reloaded,
            Err(e) => {
                warn!(cache = %self.config.name, key = store_key, error = %e, "Refresh reload failed, retrying next sweep");
                RefreshOutcome::Failed
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
