//! Cache Metrics Collection
//!
//! Lock-free counters for one cache instance: per-tier traffic, load-through,
//! refresh-ahead and sync activity. Export is left to the embedding
//! application via [`CacheMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::MAX_TIERS;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Per-tier metrics, index 0 = fastest
    tier_hits: [AtomicU64; MAX_TIERS],
    tier_misses: [AtomicU64; MAX_TIERS],
    tier_promotions: [AtomicU64; MAX_TIERS],
    promotion_failures: AtomicU64,

    // Load-through
    loads: AtomicU64,
    load_failures: AtomicU64,
    negative_stores: AtomicU64,
    containment_rejections: AtomicU64,
    lock_timeouts: AtomicU64,
    load_latency_us: AtomicU64,

    // Refresh-ahead
    refresh_successes: AtomicU64,
    refresh_failures: AtomicU64,
    refresh_skipped: AtomicU64,
    refresh_dropped: AtomicU64,

    // Sync
    sync_published: AtomicU64,
    sync_publish_failures: AtomicU64,
    sync_applied: AtomicU64,
    sync_ignored: AtomicU64,
    sync_malformed: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Tier metrics
    pub fn record_tier_hit(&self, tier: usize) {
        if let Some(c) = self.tier_hits.get(tier) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tier_hits(&self, tier: usize, n: u64) {
        if let Some(c) = self.tier_hits.get(tier) {
            c.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_tier_miss(&self, tier: usize) {
        if let Some(c) = self.tier_misses.get(tier) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tier_misses(&self, tier: usize, n: u64) {
        if let Some(c) = self.tier_misses.get(tier) {
            c.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Values copied into `tier` from a slower tier
    pub fn record_promotions(&self, tier: usize, n: u64) {
        if let Some(c) = self.tier_promotions.get(tier) {
            c.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_promotion_failure(&self) {
        self.promotion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tier_hits(&self, tier: usize) -> u64 {
        self.tier_hits
            .get(tier)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn tier_misses(&self, tier: usize) -> u64 {
        self.tier_misses
            .get(tier)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn tier_hit_ratio(&self, tier: usize) -> f64 {
        let hits = self.tier_hits(tier) as f64;
        let total = hits + self.tier_misses(tier) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    // Load-through
    pub fn record_load(&self, duration: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.load_latency_us, duration);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_negative_store(&self, n: u64) {
        self.negative_stores.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_containment_rejection(&self, n: u64) {
        self.containment_rejections.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn load_latency(&self) -> Duration {
        Duration::from_micros(self.load_latency_us.load(Ordering::Relaxed))
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    // Refresh-ahead
    pub fn record_refresh_success(&self) {
        self.refresh_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Key skipped because another holder had its lock
    pub fn record_refresh_skipped(&self) {
        self.refresh_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Key dropped from tracking for stale access
    pub fn record_refresh_dropped(&self, n: u64) {
        self.refresh_dropped.fetch_add(n, Ordering::Relaxed);
    }

    // Sync
    pub fn record_sync_published(&self) {
        self.sync_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_publish_failure(&self) {
        self.sync_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_applied(&self) {
        self.sync_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound message from this instance or for another cache
    pub fn record_sync_ignored(&self) {
        self.sync_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_malformed(&self) {
        self.sync_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits at any tier over all lookups that reached the last tier or hit
    pub fn overall_hit_ratio(&self) -> f64 {
        let total_hits: u64 = (0..MAX_TIERS).map(|t| self.tier_hits(t)).sum();
        // Only count final misses: tier 0 misses that no slower tier served
        let final_misses = self.tier_misses(0).saturating_sub(
            (1..MAX_TIERS).map(|t| self.tier_hits(t)).sum::<u64>(),
        );
        let total = total_hits + final_misses;

        if total == 0 {
            0.0
        } else {
            total_hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            tier_hits: std::array::from_fn(|t| self.tier_hits(t)),
            tier_misses: std::array::from_fn(|t| self.tier_misses(t)),
            tier_promotions: std::array::from_fn(|t| load(&self.tier_promotions[t])),
            promotion_failures: load(&self.promotion_failures),

            loads: self.loads(),
            load_failures: load(&self.load_failures),
            negative_stores: load(&self.negative_stores),
            containment_rejections: load(&self.containment_rejections),
            lock_timeouts: load(&self.lock_timeouts),
            load_latency: self.load_latency(),

            refresh_successes: load(&self.refresh_successes),
            refresh_failures: load(&self.refresh_failures),
            refresh_skipped: load(&self.refresh_skipped),
            refresh_dropped: load(&self.refresh_dropped),

            sync_published: load(&self.sync_published),
            sync_publish_failures: load(&self.sync_publish_failures),
            sync_applied: load(&self.sync_applied),
            sync_ignored: load(&self.sync_ignored),
            sync_malformed: load(&self.sync_malformed),

            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Tiers
    pub tier_hits: [u64; MAX_TIERS],
    pub tier_misses: [u64; MAX_TIERS],
    pub tier_promotions: [u64; MAX_TIERS],
    pub promotion_failures: u64,

    // Load-through
    pub loads: u64,
    pub load_failures: u64,
    pub negative_stores: u64,
    pub containment_rejections: u64,
    pub lock_timeouts: u64,
    pub load_latency: Duration,

    // Refresh-ahead
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    pub refresh_skipped: u64,
    pub refresh_dropped: u64,

    // Sync
    pub sync_published: u64,
    pub sync_publish_failures: u64,
    pub sync_applied: u64,
    pub sync_ignored: u64,
    pub sync_malformed: u64,

    // Overall
    pub overall_hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.tier_hits(0), 0);
        assert_eq!(metrics.loads(), 0);
        assert_eq!(metrics.overall_hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_tier_hit(0);
        metrics.record_tier_hit(0);
        metrics.record_tier_miss(0);

        assert_eq!(metrics.tier_hits(0), 2);
        assert_eq!(metrics.tier_misses(0), 1);
        assert!((metrics.tier_hit_ratio(0) - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_out_of_range_tier_is_ignored() {
        let metrics = CacheMetrics::new();
        metrics.record_tier_hit(MAX_TIERS);
        assert_eq!(metrics.tier_hits(MAX_TIERS), 0);
    }

    #[test]
    fn test_overall_ratio_counts_slower_tier_hits() {
        let metrics = CacheMetrics::new();
        // Two lookups miss tier 0; one is served by tier 1, one misses everywhere
        metrics.record_tier_misses(0, 2);
        metrics.record_tier_hit(1);
        metrics.record_tier_miss(1);
        assert!((metrics.overall_hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_latency_ema() {
        let metrics = CacheMetrics::new();

        metrics.record_load(Duration::from_micros(100));
        assert_eq!(metrics.load_latency(), Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_load(Duration::from_micros(200));
        let latency = metrics.load_latency().as_micros();
        assert!(latency > 100 && latency < 200);
        assert_eq!(metrics.loads(), 2);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();
        metrics.record_promotions(0, 3);
        metrics.record_sync_published();
        metrics.record_sync_ignored();
        metrics.record_refresh_dropped(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.tier_promotions, [3, 0, 0]);
        assert_eq!(snap.sync_published, 1);
        assert_eq!(snap.sync_ignored, 1);
        assert_eq!(snap.refresh_dropped, 2);
    }
}
