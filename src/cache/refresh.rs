//! Refresh-Ahead Scheduler
//!
//! Tracks when each key was last read and periodically reloads hot keys
//! before they go stale.
//!
//! ```text
//! untracked ──access──▶ tracked ──access──▶ tracked (re-armed)
//!                          │                    │
//!                          │ sweep: due         │ sweep: idle past cutoff
//!                          ▼                    ▼
//!                  reloaded in place        untracked
//! ```
//!
//! A sweep never waits on a contended key: it uses a non-blocking lock
//! attempt and retries the key on the next sweep.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::metrics::CacheMetrics;
use crate::error::{Error, Result};

/// Refresh-ahead configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Minimum time between reloads of one key
    pub refresh_interval: Duration,
    /// Stop refreshing keys not read for this long (None = never stop)
    pub stop_after_access: Option<Duration>,
    /// How often the sweep runs
    pub sweep_period: Duration,
    /// Maximum concurrent reloads per sweep
    pub max_concurrent: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            stop_after_access: Some(Duration::from_secs(3600)),
            sweep_period: Duration::from_secs(5),
            max_concurrent: 8,
        }
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(Error::Config("refresh interval must be non-zero".into()));
        }
        if self.sweep_period.is_zero() {
            return Err(Error::Config("refresh sweep period must be non-zero".into()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config("refresh concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

/// Result of one background reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Loader ran and the value was written through
    Reloaded,
    /// Another holder had the key's lock
    Contended,
    /// Loader or store failed; the key stays tracked
    Failed,
}

/// Performs the reload for one tracked key
#[async_trait]
pub trait RefreshConsumer<K>: Send + Sync {
    async fn reload(&self, store_key: &str, key: &K) -> RefreshOutcome;
}

#[derive(Debug, Clone)]
struct RefreshEntry<K> {
    key: K,
    last_access: Instant,
    last_refresh: Instant,
}

/// Per-cache table of tracked keys plus the sweep that reloads them
pub struct RefreshTracker<K> {
    config: RefreshConfig,
    entries: DashMap<String, RefreshEntry<K>>,
    consumer: OnceCell<Weak<dyn RefreshConsumer<K>>>,
    permits: Arc<Semaphore>,
    metrics: Arc<CacheMetrics>,
}

impl<K> RefreshTracker<K>
where
    K: Clone + Send + Sync + 'static,
{
    pub fn new(config: RefreshConfig, metrics: Arc<CacheMetrics>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            entries: DashMap::new(),
            consumer: OnceCell::new(),
            permits,
            metrics,
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Wire the reload callback. Only the first call takes effect.
    pub fn set_consumer(&self, consumer: Weak<dyn RefreshConsumer<K>>) -> bool {
        self.consumer.set(consumer).is_ok()
    }

    /// Record a read of `store_key`
    pub fn access(&self, store_key: &str, key: &K) {
        let now = Instant::now();
        self.entries
            .entry(store_key.to_string())
            .and_modify(|e| e.last_access = now)
            .or_insert_with(|| RefreshEntry {
                key: key.clone(),
                last_access: now,
                last_refresh: now,
            });
    }

    pub fn access_all<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = (&'a str, &'a K)>,
        K: 'a,
    {
        for (store_key, key) in keys {
            self.access(store_key, key);
        }
    }

    pub fn remove(&self, store_key: &str) {
        self.entries.remove(store_key);
    }

    pub fn remove_all(&self, store_keys: &[String]) {
        for store_key in store_keys {
            self.entries.remove(store_key);
        }
    }

    /// Drop every tracked key
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn is_tracked(&self, store_key: &str) -> bool {
        self.entries.contains_key(store_key)
    }

    /// Store keys currently tracked
    pub fn tracked_keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_consumer(&self) -> Option<Arc<dyn RefreshConsumer<K>>> {
        self.consumer.get().and_then(Weak::upgrade)
    }

    /// Run one sweep, returning the number of keys reloaded.
    ///
    /// Keys idle past the stop-after-access cutoff are dropped; keys whose
    /// last refresh is older than the refresh interval are reloaded through
    /// the consumer with at most `max_concurrent` reloads in flight.
    #[instrument(skip(self), fields(tracked = self.entries.len()))]
    pub async fn sweep(&self) -> usize {
        let Some(consumer) = self.live_consumer() else {
            return 0;
        };

        let now = Instant::now();
        let mut due = Vec::new();
        let mut stale = Vec::new();

        for entry in self.entries.iter() {
            if self.is_idle(entry.value(), now) {
                stale.push(entry.key().clone());
            } else if now.saturating_duration_since(entry.value().last_refresh)
                >= self.config.refresh_interval
            {
                due.push((entry.key().clone(), entry.value().key.clone()));
            }
        }

        let mut dropped = 0u64;
        for store_key in &stale {
            // Re-check: a read may have re-armed the key since the scan
            if self
                .entries
                .remove_if(store_key, |_, e| self.is_idle(e, Instant::now()))
                .is_some()
            {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.metrics.record_refresh_dropped(dropped);
            debug!(dropped, "Stopped refreshing idle keys");
        }

        let mut tasks = JoinSet::new();
        for (store_key, key) in due {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let consumer = Arc::clone(&consumer);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = consumer.reload(&store_key, &key).await;
                (store_key, outcome)
            });
        }

        let mut reloaded = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((store_key, RefreshOutcome::Reloaded)) => {
                    if let Some(mut entry) = self.entries.get_mut(&store_key) {
                        entry.value_mut().last_refresh = Instant::now();
                    }
                    self.metrics.record_refresh_success();
                    reloaded += 1;
                }
                Ok((store_key, RefreshOutcome::Contended)) => {
                    self.metrics.record_refresh_skipped();
                    debug!(key = %store_key, "Refresh skipped, key is being loaded");
                }
                Ok((_, RefreshOutcome::Failed)) => self.metrics.record_refresh_failure(),
                Err(e) => {
                    self.metrics.record_refresh_failure();
                    warn!(error = %e, "Refresh task aborted");
                }
            }
        }
        reloaded
    }

    fn is_idle(&self, entry: &RefreshEntry<K>, now: Instant) -> bool {
        self.config
            .stop_after_access
            .map(|cutoff| now.saturating_duration_since(entry.last_access) > cutoff)
            .unwrap_or(false)
    }

    /// Start the periodic sweep on the current runtime.
    ///
    /// The task ends when `shutdown` is cancelled or the consumer is gone.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(period = ?self.config.sweep_period, "Starting refresh sweep");
            let mut tick = interval(self.config.sweep_period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Refresh sweep shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        if self.consumer.get().is_some() && self.live_consumer().is_none() {
                            debug!("Cache dropped, refresh sweep exiting");
                            break;
                        }
                        let reloaded = self.sweep().await;
                        if reloaded > 0 {
                            debug!(reloaded, tracked = self.len(), "Refresh sweep completed");
                        }
                    }
                }
            }
        })
    }
}

impl<K> std::fmt::Debug for RefreshTracker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTracker")
            .field("config", &self.config)
            .field("tracked", &self.entries.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        outcome: RefreshOutcome,
        reloads: AtomicUsize,
        keys: Mutex<Vec<u32>>,
    }

    impl Recording {
        fn new(outcome: RefreshOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                reloads: AtomicUsize::new(0),
                keys: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RefreshConsumer<u32> for Recording {
        async fn reload(&self, _store_key: &str, key: &u32) -> RefreshOutcome {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().push(*key);
            self.outcome
        }
    }

    fn new_tracker(interval_ms: u64, stop_ms: Option<u64>) -> (RefreshTracker<u32>, Arc<CacheMetrics>) {
        let metrics = Arc::new(CacheMetrics::new());
        let config = RefreshConfig {
            refresh_interval: Duration::from_millis(interval_ms),
            stop_after_access: stop_ms.map(Duration::from_millis),
            sweep_period: Duration::from_millis(10),
            max_concurrent: 2,
        };
        (RefreshTracker::new(config, Arc::clone(&metrics)), metrics)
    }

    fn wire(tracker: &RefreshTracker<u32>, consumer: &Arc<Recording>) {
        let weak: Weak<dyn RefreshConsumer<u32>> = Arc::downgrade(consumer) as Weak<dyn RefreshConsumer<u32>>;
        assert!(tracker.set_consumer(weak));
    }

    #[test]
    fn test_config_validation() {
        assert!(RefreshConfig::default().validate().is_ok());
        let zero = RefreshConfig {
            refresh_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_access_and_remove() {
        let (tracker, _) = new_tracker(50, None);
        tracker.access("k:1", &1);
        tracker.access("k:1", &1);
        tracker.access_all([("k:2", &2), ("k:3", &3)]);
        assert_eq!(tracker.len(), 3);

        tracker.remove("k:1");
        tracker.remove_all(&["k:2".to_string()]);
        assert_eq!(tracker.tracked_keys(), vec!["k:3".to_string()]);

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_without_consumer_is_noop() {
        let (tracker, _) = new_tracker(0, None);
        tracker.access("k:1", &1);
        assert_eq!(tracker.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_due_key_reloaded_once_per_interval() {
        let (tracker, metrics) = new_tracker(30, None);
        let consumer = Recording::new(RefreshOutcome::Reloaded);
        wire(&tracker, &consumer);

        tracker.access("k:1", &1);
        assert_eq!(tracker.sweep().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(tracker.sweep().await, 1);
        // Just refreshed, not due again yet
        assert_eq!(tracker.sweep().await, 0);

        assert_eq!(consumer.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(*consumer.keys.lock(), vec![1]);
        assert_eq!(metrics.snapshot().refresh_successes, 1);
    }

    #[tokio::test]
    async fn test_idle_key_dropped_instead_of_refreshed() {
        let (tracker, metrics) = new_tracker(10, Some(20));
        let consumer = Recording::new(RefreshOutcome::Reloaded);
        wire(&tracker, &consumer);

        tracker.access("k:1", &1);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(tracker.sweep().await, 0);
        assert!(!tracker.is_tracked("k:1"));
        assert_eq!(consumer.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.snapshot().refresh_dropped, 1);
    }

    #[tokio::test]
    async fn test_failed_and_contended_keys_stay_tracked() {
        for outcome in [RefreshOutcome::Failed, RefreshOutcome::Contended] {
            let (tracker, metrics) = new_tracker(0, None);
            let consumer = Recording::new(outcome);
            wire(&tracker, &consumer);

            tracker.access("k:1", &1);
            assert_eq!(tracker.sweep().await, 0);
            assert!(tracker.is_tracked("k:1"));

            let snap = metrics.snapshot();
            assert_eq!(snap.refresh_failures + snap.refresh_skipped, 1);
        }
    }

    #[tokio::test]
    async fn test_background_sweeper_stops_on_cancel() {
        let (tracker, _) = new_tracker(5, None);
        let tracker = Arc::new(tracker);
        let consumer = Recording::new(RefreshOutcome::Reloaded);
        wire(&tracker, &consumer);
        tracker.access("k:1", &1);

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&tracker).spawn_sweeper(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(consumer.reloads.load(Ordering::SeqCst) >= 1);
    }
}
