//! Level Composition
//!
//! Cascades cache operations across one to three tiers ordered fastest-first.
//!
//! ```text
//!  read:   tier 0 ──miss──▶ tier 1 ──miss──▶ tier 2 ──miss──▶ absent
//!            ▲                │ hit             │ hit
//!            └──── promote ───┘◀──── promote ───┘
//!
//!  write/evict/clear:  tier 2 ──▶ tier 1 ──▶ tier 0
//! ```
//!
//! Writes land on the slowest tier first so that an interrupted cascade leaves
//! the fast tier stale rather than ahead of the shared tiers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::metrics::CacheMetrics;
use super::MAX_TIERS;
use crate::domain::ports::Store;
use crate::error::{Error, Result};

/// Shape of a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierLayout {
    /// Pass-through, no promotion
    Single,
    TwoTier,
    ThreeTier,
}

impl TierLayout {
    pub fn depth(&self) -> usize {
        match self {
            TierLayout::Single => 1,
            TierLayout::TwoTier => 2,
            TierLayout::ThreeTier => 3,
        }
    }
}

impl std::fmt::Display for TierLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierLayout::Single => write!(f, "single"),
            TierLayout::TwoTier => write!(f, "two-tier"),
            TierLayout::ThreeTier => write!(f, "three-tier"),
        }
    }
}

/// Ordered set of tiers with cascading semantics
pub struct TieredStore {
    tiers: Vec<Arc<dyn Store>>,
    layout: TierLayout,
    metrics: Arc<CacheMetrics>,
}

impl TieredStore {
    /// Compose tiers ordered fastest-first
    pub fn new(tiers: Vec<Arc<dyn Store>>, metrics: Arc<CacheMetrics>) -> Result<Self> {
        let layout = match tiers.len() {
            1 => TierLayout::Single,
            2 => TierLayout::TwoTier,
            3 => TierLayout::ThreeTier,
            n => {
                return Err(Error::Config(format!(
                    "a cache needs between 1 and {} tiers, got {}",
                    MAX_TIERS, n
                )))
            }
        };
        Ok(Self {
            tiers,
            layout,
            metrics,
        })
    }

    pub fn layout(&self) -> TierLayout {
        self.layout
    }

    pub fn depth(&self) -> usize {
        self.tiers.len()
    }

    pub fn tier(&self, index: usize) -> Option<&Arc<dyn Store>> {
        self.tiers.get(index)
    }

    /// The fastest tier, the only one peers' sync messages touch
    pub fn fastest(&self) -> &Arc<dyn Store> {
        &self.tiers[0]
    }

    /// Cascading lookup with promotion into every faster tier
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await? {
                Some(value) => {
                    self.metrics.record_tier_hit(index);
                    if index > 0 {
                        self.promote_one(key, &value, index).await;
                    }
                    return Ok(Some(value));
                }
                None => self.metrics.record_tier_miss(index),
            }
        }
        Ok(None)
    }

    /// Batched cascading lookup over the shrinking set of missing keys
    pub async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing: Vec<String> = keys.to_vec();

        for (index, tier) in self.tiers.iter().enumerate() {
            if missing.is_empty() {
                break;
            }

            let hits = tier.get_all(&missing).await?;
            self.metrics.record_tier_hits(index, hits.len() as u64);
            self.metrics
                .record_tier_misses(index, (missing.len() - hits.len().min(missing.len())) as u64);

            if hits.is_empty() {
                continue;
            }
            if index > 0 {
                self.promote_many(&hits, index).await;
            }
            missing.retain(|k| !hits.contains_key(k));
            found.extend(hits);
        }

        Ok(found)
    }

    async fn promote_one(&self, key: &str, value: &Bytes, found_at: usize) {
        for target in (0..found_at).rev() {
            match self.tiers[target].put(key, value.clone()).await {
                Ok(()) => self.metrics.record_promotions(target, 1),
                Err(e) => {
                    self.metrics.record_promotion_failure();
                    warn!(key, tier = target, error = %e, "Promotion write-back failed");
                }
            }
        }
    }

    async fn promote_many(&self, hits: &HashMap<String, Bytes>, found_at: usize) {
        for target in (0..found_at).rev() {
            match self.tiers[target].put_all(hits.clone()).await {
                Ok(()) => self.metrics.record_promotions(target, hits.len() as u64),
                Err(e) => {
                    self.metrics.record_promotion_failure();
                    warn!(count = hits.len(), tier = target, error = %e, "Batched promotion failed");
                }
            }
        }
        debug!(count = hits.len(), from = found_at, "Promoted batch");
    }

    /// Write through every tier, slowest first
    pub async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        for tier in self.tiers.iter().rev() {
            tier.put(key, value.clone()).await?;
        }
        Ok(())
    }

    pub async fn put_all(&self, entries: HashMap<String, Bytes>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for tier in self.tiers.iter().rev() {
            tier.put_all(entries.clone()).await?;
        }
        Ok(())
    }

    /// Remove from every tier, slowest first
    pub async fn evict(&self, key: &str) -> Result<()> {
        for tier in self.tiers.iter().rev() {
            tier.evict(key).await?;
        }
        Ok(())
    }

    pub async fn evict_all(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for tier in self.tiers.iter().rev() {
            tier.evict_all(keys).await?;
        }
        Ok(())
    }

    /// Clear every tier, slowest first
    pub async fn clear(&self) -> Result<()> {
        for tier in self.tiers.iter().rev() {
            tier.clear().await?;
        }
        Ok(())
    }

    /// Probe one tier without promotion or metrics
    pub async fn contains_in_tier(&self, key: &str, tier: usize) -> Result<bool> {
        let store = self.tiers.get(tier).ok_or_else(|| {
            Error::Config(format!("tier {} out of range for {} layout", tier, self.layout))
        })?;
        Ok(store.get(key).await?.is_some())
    }
}

impl std::fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tiers.iter().map(|t| t.name()).collect();
        f.debug_struct("TieredStore")
            .field("layout", &self.layout)
            .field("tiers", &names)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
