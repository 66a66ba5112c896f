//! Cache Builder
//!
//! Assembles a [`CacheConfig`] and the tier cascade, then starts the
//! background pieces (refresh sweep, sync subscription) and hands back a
//! ready [`Cache`].
//!
//! ```ignore
//! let cache: Cache<u64, User> = CacheBuilder::new("users")
//!     .tier(Arc::new(MemoryStore::new("local")))
//!     .tier(remote)
//!     .display_keys()
//!     .json()
//!     .negative_caching(true)
//!     .loader(UserLoader::new(db))
//!     .sync(bus)
//!     .build()?;
//! ```

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::compression::{CompressionAlgorithm, Compressor};
use super::manager::Cache;
use super::metrics::CacheMetrics;
use super::pipeline::ValuePipeline;
use super::refresh::RefreshConfig;
use super::MAX_TIERS;
use crate::adapters::codecs::{DisplayKeyCodec, JsonCodec};
use crate::adapters::containment::AllowAll;
use crate::domain::events::sync_channel;
use crate::domain::ports::{
    CacheLoader, ContainmentPredicate, KeyCodec, Store, SyncPublisher, SyncSubscriber, ValueCodec,
};
use crate::error::{Error, Result};

/// Immutable per-cache configuration.
///
/// Built once by [`CacheBuilder`]; a different configuration means a new
/// cache.
pub struct CacheConfig<K, V> {
    pub(crate) name: String,
    pub(crate) instance_id: Uuid,
    pub(crate) key_codec: Arc<dyn KeyCodec<K>>,
    pub(crate) pipeline: ValuePipeline<V>,
    pub(crate) containment: Arc<dyn ContainmentPredicate>,
    pub(crate) load_lock_timeout: Option<Duration>,
    pub(crate) metrics: Arc<CacheMetrics>,
    pub(crate) publisher: Option<Arc<dyn SyncPublisher>>,
    pub(crate) subscriber: Option<Arc<dyn SyncSubscriber>>,
    pub(crate) sync_channel: String,
    pub(crate) refresh: Option<RefreshConfig>,
    pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
}

impl<K, V> CacheConfig<K, V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn negative_caching(&self) -> bool {
        self.pipeline.negative_caching()
    }

    pub fn load_lock_timeout(&self) -> Option<Duration> {
        self.load_lock_timeout
    }

    pub fn sync_channel(&self) -> &str {
        &self.sync_channel
    }

    pub fn refresh(&self) -> Option<&RefreshConfig> {
        self.refresh.as_ref()
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }
}

impl<K, V> std::fmt::Debug for CacheConfig<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("codec", &self.pipeline.codec_name())
            .field("negative_caching", &self.pipeline.negative_caching())
            .field("load_lock_timeout", &self.load_lock_timeout)
            .field("sync_channel", &self.sync_channel)
            .field("publishes", &self.publisher.is_some())
            .field("subscribes", &self.subscriber.is_some())
            .field("refresh", &self.refresh)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

/// Builder for [`Cache`]
pub struct CacheBuilder<K, V> {
    name: String,
    tiers: Vec<Arc<dyn Store>>,
    key_codec: Option<Arc<dyn KeyCodec<K>>>,
    value_codec: Option<Arc<dyn ValueCodec<V>>>,
    compressor: Option<Arc<dyn Compressor>>,
    negative_caching: bool,
    null_sentinel: Option<Bytes>,
    containment: Arc<dyn ContainmentPredicate>,
    load_lock_timeout: Option<Duration>,
    publisher: Option<Arc<dyn SyncPublisher>>,
    subscriber: Option<Arc<dyn SyncSubscriber>>,
    sync_infix: Option<String>,
    refresh: Option<RefreshConfig>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    instance_id: Option<Uuid>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tiers: Vec::new(),
            key_codec: None,
            value_codec: None,
            compressor: None,
            negative_caching: false,
            null_sentinel: None,
            containment: Arc::new(AllowAll),
            load_lock_timeout: None,
            publisher: None,
            subscriber: None,
            sync_infix: None,
            refresh: None,
            loader: None,
            instance_id: None,
            metrics: None,
        }
    }

    /// Append a tier; call fastest first
    pub fn tier(mut self, store: Arc<dyn Store>) -> Self {
        self.tiers.push(store);
        self
    }

    /// Replace all tiers, ordered fastest first
    pub fn tiers(mut self, stores: Vec<Arc<dyn Store>>) -> Self {
        self.tiers = stores;
        self
    }

    pub fn key_codec<C: KeyCodec<K> + 'static>(mut self, codec: C) -> Self {
        self.key_codec = Some(Arc::new(codec));
        self
    }

    pub fn value_codec<C: ValueCodec<V> + 'static>(mut self, codec: C) -> Self {
        self.value_codec = Some(Arc::new(codec));
        self
    }

    pub(crate) fn value_codec_arc(mut self, codec: Arc<dyn ValueCodec<V>>) -> Self {
        self.value_codec = Some(codec);
        self
    }

    /// Enable compression with a built-in algorithm
    pub fn compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.compressor = match algorithm {
            CompressionAlgorithm::None => None,
            other => Some(other.compressor()),
        };
        self
    }

    /// Enable compression with a custom compressor
    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Cache "source has nothing" as an explicit empty value
    pub fn negative_caching(mut self, enabled: bool) -> Self {
        self.negative_caching = enabled;
        self
    }

    /// Custom sentinel bytes for negative caching (implies enabling it)
    pub fn null_sentinel(mut self, sentinel: impl Into<Bytes>) -> Self {
        self.negative_caching = true;
        self.null_sentinel = Some(sentinel.into());
        self
    }

    pub fn containment(mut self, predicate: Arc<dyn ContainmentPredicate>) -> Self {
        self.containment = predicate;
        self
    }

    /// Bound the wait for a key's load lock; unbounded by default
    pub fn load_lock_timeout(mut self, timeout: Duration) -> Self {
        self.load_lock_timeout = Some(timeout);
        self
    }

    /// Default loader for `get_or_load`, `get_or_load_all` and refresh
    pub fn loader<L: CacheLoader<K, V> + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn loader_arc(mut self, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Publish and subscribe through one transport
    pub fn sync<T>(mut self, transport: Arc<T>) -> Self
    where
        T: SyncPublisher + SyncSubscriber + 'static,
    {
        self.publisher = Some(Arc::clone(&transport) as Arc<dyn SyncPublisher>);
        self.subscriber = Some(transport as Arc<dyn SyncSubscriber>);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn SyncPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn SyncSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Namespace segment of the sync channel
    pub fn sync_infix(mut self, infix: impl Into<String>) -> Self {
        self.sync_infix = Some(infix.into());
        self
    }

    /// Enable refresh-ahead; requires a loader
    pub fn refresh(mut self, config: RefreshConfig) -> Self {
        self.refresh = Some(config);
        self
    }

    /// Override the generated instance id
    pub fn instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// Share a metrics collector
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate and assemble the immutable configuration
    pub fn into_config(self) -> Result<(CacheConfig<K, V>, Vec<Arc<dyn Store>>)> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("cache name must not be empty".into()));
        }
        if self.tiers.is_empty() || self.tiers.len() > MAX_TIERS {
            return Err(Error::Config(format!(
                "cache {} needs between 1 and {} tiers, got {}",
                self.name,
                MAX_TIERS,
                self.tiers.len()
            )));
        }
        let key_codec = self
            .key_codec
            .ok_or_else(|| Error::Config(format!("cache {} has no key codec", self.name)))?;
        let value_codec = self
            .value_codec
            .ok_or_else(|| Error::Config(format!("cache {} has no value codec", self.name)))?;

        if let Some(refresh) = &self.refresh {
            refresh.validate()?;
            if self.loader.is_none() {
                return Err(Error::Config(format!(
                    "cache {} enables refresh-ahead without a loader",
                    self.name
                )));
            }
        }

        let mut pipeline = ValuePipeline::new(value_codec);
        if let Some(compressor) = self.compressor {
            pipeline = pipeline.with_compressor(compressor);
        }
        if self.negative_caching {
            pipeline = match self.null_sentinel {
                Some(sentinel) => pipeline.with_null_sentinel(sentinel),
                None => pipeline.with_negative_caching(),
            };
        }

        let channel = sync_channel(self.sync_infix.as_deref(), &self.name);
        let config = CacheConfig {
            name: self.name,
            instance_id: self.instance_id.unwrap_or_else(Uuid::new_v4),
            key_codec,
            pipeline,
            containment: self.containment,
            load_lock_timeout: self.load_lock_timeout,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(CacheMetrics::new())),
            publisher: self.publisher,
            subscriber: self.subscriber,
            sync_channel: channel,
            refresh: self.refresh,
            loader: self.loader,
        };
        Ok((config, self.tiers))
    }

    /// Build the cache and start its background tasks.
    ///
    /// Refresh-ahead and sync subscription need a running tokio runtime.
    pub fn build(self) -> Result<Cache<K, V>> {
        let (config, tiers) = self.into_config()?;
        Cache::start(config, tiers)
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + Display + 'static,
    V: Send + Sync + 'static,
{
    /// Store keys from `K`'s `Display`
    pub fn display_keys(self) -> Self {
        self.key_codec(DisplayKeyCodec::new())
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Serialize values as JSON
    pub fn json(self) -> Self {
        self.value_codec(JsonCodec::<V>::new())
    }
}

impl<K, V> std::fmt::Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<&str> = self.tiers.iter().map(|t| t.name()).collect();
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("tiers", &tiers)
            .field("negative_caching", &self.negative_caching)
            .field("refresh", &self.refresh)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use crate::domain::ports::FnLoader;
    use assert_matches::assert_matches;

    fn base() -> CacheBuilder<u32, String> {
        CacheBuilder::new("users")
            .tier(Arc::new(MemoryStore::new("local")))
            .display_keys()
            .json()
    }

    #[test]
    fn test_config_defaults() {
        let (config, tiers) = base().into_config().unwrap();
        assert_eq!(config.name(), "users");
        assert_eq!(config.sync_channel(), "cascache:users");
        assert!(!config.negative_caching());
        assert!(config.load_lock_timeout().is_none());
        assert_eq!(tiers.len(), 1);
    }

    #[test]
    fn test_infix_and_sentinel() {
        let (config, _) = base()
            .sync_infix("prod")
            .null_sentinel(Bytes::from_static(b"<nil>"))
            .into_config()
            .unwrap();
        assert_eq!(config.sync_channel(), "cascache:prod:users");
        assert!(config.negative_caching());
    }

    #[test]
    fn test_tier_count_bounds() {
        let none: CacheBuilder<u32, String> = CacheBuilder::new("x").display_keys().json();
        assert_matches!(none.into_config().err(), Some(Error::Config(_)));

        let mut four = base();
        for i in 0..3 {
            four = four.tier(Arc::new(MemoryStore::new(format!("extra{}", i))));
        }
        assert_matches!(four.into_config().err(), Some(Error::Config(_)));
    }

    #[test]
    fn test_missing_codecs_rejected() {
        let builder: CacheBuilder<u32, String> =
            CacheBuilder::new("x").tier(Arc::new(MemoryStore::new("local")));
        assert_matches!(builder.into_config().err(), Some(Error::Config(ref m)) if m.contains("key codec"));
    }

    #[test]
    fn test_refresh_without_loader_is_build_error() {
        let err = base()
            .refresh(RefreshConfig::default())
            .into_config()
            .err()
            .unwrap();
        assert_matches!(err, Error::Config(ref m) if m.contains("without a loader"));
    }

    #[test]
    fn test_refresh_with_loader_accepted() {
        let loader = FnLoader::new(|id: u32| async move { Ok::<_, anyhow::Error>(Some(id.to_string())) });
        let (config, _) = base()
            .loader(loader)
            .refresh(RefreshConfig::default())
            .into_config()
            .unwrap();
        assert!(config.has_loader());
        assert!(config.refresh().is_some());
    }

    #[test]
    fn test_empty_name_rejected() {
        let builder: CacheBuilder<u32, String> = CacheBuilder::new("  ")
            .tier(Arc::new(MemoryStore::new("local")))
            .display_keys()
            .json();
        assert!(builder.into_config().is_err());
    }
}
