//! Provider Registry
//!
//! Maps string ids to factories for stores, value codecs, compressors and
//! sync transports. Ids are resolved once when a cache is built; the engine
//! never looks anything up by name afterwards.
//!
//! Built-in providers:
//!
//! | kind       | id              | provides                                  |
//! |------------|-----------------|-------------------------------------------|
//! | store      | `memory`        | [`MemoryStore`], one per tier             |
//! | store      | `shared-memory` | [`SharedMemoryStore`] shared by namespace |
//! | compressor | `none`, `lz4`   | [`CompressionAlgorithm`] compressors      |
//! | codec      | `string`        | [`StringCodec`] for `String` values       |
//! | codec      | `bytes`         | [`BytesCodec`] for `Bytes` values         |
//! | transport  | `broadcast`     | one [`BroadcastBus`] per registry         |
//! | transport  | `logging`       | [`LoggingSyncPublisher`], publish only    |

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::adapters::{
    BroadcastBus, BytesCodec, JsonCodec, LoggingSyncPublisher, SharedMemoryStore, StringCodec,
};
use crate::cache::{
    CacheBuilder, CompressionAlgorithm, Compressor, MemoryStore, MemoryStoreConfig,
    DEFAULT_MEMORY_CAPACITY,
};
use crate::config::{CacheSettings, SyncSettings, TierSettings};
use crate::domain::ports::{Store, SyncPublisher, SyncSubscriber, ValueCodec};
use crate::error::{Error, Result};

/// Builds a store for a tier of the named cache
pub type StoreFactory = Arc<dyn Fn(&str, &TierSettings) -> Result<Arc<dyn Store>> + Send + Sync>;

/// Builds a compressor
pub type CompressorFactory = Arc<dyn Fn() -> Arc<dyn Compressor> + Send + Sync>;

/// Builds a sync transport
pub type TransportFactory = Arc<dyn Fn(&SyncSettings) -> Result<SyncTransport> + Send + Sync>;

/// Builds a value codec for `V`
pub type CodecFactory<V> = Arc<dyn Fn() -> Arc<dyn ValueCodec<V>> + Send + Sync>;

/// Resolved sync transport
#[derive(Clone)]
pub struct SyncTransport {
    pub publisher: Arc<dyn SyncPublisher>,
    /// None for publish-only transports
    pub subscriber: Option<Arc<dyn SyncSubscriber>>,
}

/// Capability registry
pub struct ProviderRegistry {
    stores: HashMap<String, StoreFactory>,
    compressors: HashMap<String, CompressorFactory>,
    transports: HashMap<String, TransportFactory>,
    codecs: HashMap<(String, TypeId), Box<dyn Any + Send + Sync>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    /// Registry with no providers
    pub fn empty() -> Self {
        Self {
            stores: HashMap::new(),
            compressors: HashMap::new(),
            transports: HashMap::new(),
            codecs: HashMap::new(),
        }
    }

    /// Registry with the built-in providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register_store("memory", |cache: &str, tier: &TierSettings| {
            let config = MemoryStoreConfig {
                capacity: tier.capacity_bytes.unwrap_or(DEFAULT_MEMORY_CAPACITY),
                ttl: tier.ttl(),
                ..Default::default()
            };
            Ok(Arc::new(MemoryStore::with_config(format!("{}:memory", cache), config))
                as Arc<dyn Store>)
        });

        let shared: Arc<DashMap<String, Arc<SharedMemoryStore>>> = Arc::new(DashMap::new());
        registry.register_store("shared-memory", move |_cache: &str, tier: &TierSettings| {
            let namespace = tier.namespace.clone().unwrap_or_else(|| "default".to_string());
            let store = Arc::clone(
                shared
                    .entry(namespace.clone())
                    .or_insert_with(|| Arc::new(SharedMemoryStore::new(format!("shared:{}", namespace))))
                    .value(),
            );
            Ok(store as Arc<dyn Store>)
        });

        for algorithm in CompressionAlgorithm::available_algorithms() {
            registry.register_compressor(algorithm.name(), move || algorithm.compressor());
        }

        registry.register_codec::<String, _>("string", || Arc::new(StringCodec));
        registry.register_codec::<Bytes, _>("bytes", || Arc::new(BytesCodec));

        let bus = Arc::new(BroadcastBus::new());
        registry.register_transport("broadcast", move |_settings: &SyncSettings| {
            Ok(SyncTransport {
                publisher: Arc::clone(&bus) as Arc<dyn SyncPublisher>,
                subscriber: Some(Arc::clone(&bus) as Arc<dyn SyncSubscriber>),
            })
        });
        registry.register_transport("logging", |_settings: &SyncSettings| {
            Ok(SyncTransport {
                publisher: Arc::new(LoggingSyncPublisher::new()),
                subscriber: None,
            })
        });

        registry
    }

    pub fn register_store<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &TierSettings) -> Result<Arc<dyn Store>> + Send + Sync + 'static,
    {
        self.stores.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn register_compressor<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Compressor> + Send + Sync + 'static,
    {
        self.compressors.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn register_transport<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&SyncSettings) -> Result<SyncTransport> + Send + Sync + 'static,
    {
        self.transports.insert(id.into(), Arc::new(factory));
        self
    }

    /// Register a value codec for values of type `V`
    pub fn register_codec<V, F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        V: 'static,
        F: Fn() -> Arc<dyn ValueCodec<V>> + Send + Sync + 'static,
    {
        let factory: CodecFactory<V> = Arc::new(factory);
        self.codecs
            .insert((id.into(), TypeId::of::<V>()), Box::new(factory));
        self
    }

    /// Register `json` for values of type `V`
    pub fn register_json_codec<V>(&mut self) -> &mut Self
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        self.register_codec::<V, _>("json", || Arc::new(JsonCodec::<V>::new()))
    }

    pub fn store(&self, cache: &str, tier: &TierSettings) -> Result<Arc<dyn Store>> {
        let factory = self
            .stores
            .get(&tier.provider)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "store",
                id: tier.provider.clone(),
            })?;
        factory(cache, tier)
    }

    pub fn compressor(&self, id: &str) -> Result<Arc<dyn Compressor>> {
        self.compressors
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownProvider {
                kind: "compressor",
                id: id.to_string(),
            })
    }

    pub fn transport(&self, settings: &SyncSettings) -> Result<SyncTransport> {
        let factory = self
            .transports
            .get(&settings.transport)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "transport",
                id: settings.transport.clone(),
            })?;
        factory(settings)
    }

    pub fn value_codec<V: 'static>(&self, id: &str) -> Result<Arc<dyn ValueCodec<V>>> {
        self.codecs
            .get(&(id.to_string(), TypeId::of::<V>()))
            .and_then(|entry| entry.downcast_ref::<CodecFactory<V>>())
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownProvider {
                kind: "codec",
                id: id.to_string(),
            })
    }

    /// Registered ids of one kind, sorted
    pub fn ids(&self, kind: &str) -> Vec<String> {
        let mut ids: Vec<String> = match kind {
            "store" => self.stores.keys().cloned().collect(),
            "compressor" => self.compressors.keys().cloned().collect(),
            "transport" => self.transports.keys().cloned().collect(),
            "codec" => self.codecs.keys().map(|(id, _)| id.clone()).collect(),
            _ => Vec::new(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("stores", &self.ids("store"))
            .field("compressors", &self.ids("compressor"))
            .field("transports", &self.ids("transport"))
            .field("codecs", &self.ids("codec"))
            .finish()
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Resolve every provider id in `settings` into a builder.
    ///
    /// Key codec, loader and (when `settings.codec` is absent) value codec
    /// are still set on the returned builder.
    pub fn from_settings(settings: &CacheSettings, registry: &ProviderRegistry) -> Result<Self> {
        settings.validate()?;

        let mut builder = CacheBuilder::new(settings.name.clone());
        for tier in &settings.tiers {
            builder = builder.tier(registry.store(&settings.name, tier)?);
        }

        if let Some(codec) = &settings.codec {
            builder = builder.value_codec_arc(registry.value_codec::<V>(codec)?);
        }

        let compressor = registry.compressor(&settings.compression)?;
        if settings.compression != CompressionAlgorithm::None.name() {
            builder = builder.compressor(compressor);
        }

        builder = builder.negative_caching(settings.negative_caching);
        if let Some(timeout) = settings.load_lock_timeout() {
            builder = builder.load_lock_timeout(timeout);
        }

        if let Some(sync) = &settings.sync {
            let transport = registry.transport(sync)?;
            if sync.publish {
                builder = builder.publisher(transport.publisher);
            }
            if sync.subscribe {
                if let Some(subscriber) = transport.subscriber {
                    builder = builder.subscriber(subscriber);
                }
            }
            if let Some(infix) = &sync.infix {
                builder = builder.sync_infix(infix.clone());
            }
        }

        if let Some(refresh) = &settings.refresh {
            builder = builder.refresh(refresh.to_config());
        }

        debug!(cache = %settings.name, tiers = settings.tiers.len(), "Resolved cache settings");
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_registered() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.ids("store"), vec!["memory", "shared-memory"]);
        assert_eq!(registry.ids("compressor"), vec!["lz4", "none"]);
        assert_eq!(registry.ids("transport"), vec!["broadcast", "logging"]);
        assert_eq!(registry.ids("codec"), vec!["bytes", "string"]);
    }

    #[test]
    fn test_shared_memory_is_shared_by_namespace() {
        let registry = ProviderRegistry::with_defaults();
        let mut tier = TierSettings::new("shared-memory");
        tier.namespace = Some("main".into());

        let a = registry.store("users", &tier).unwrap();
        let b = registry.store("orders", &tier).unwrap();
        assert_eq!(a.name(), "shared:main");
        assert_eq!(b.name(), "shared:main");

        tier.namespace = Some("other".into());
        let c = registry.store("users", &tier).unwrap();
        assert_eq!(c.name(), "shared:other");
    }

    #[test]
    fn test_unknown_ids() {
        let registry = ProviderRegistry::with_defaults();
        assert_matches!(
            registry.store("c", &TierSettings::new("redis")).err(),
            Some(Error::UnknownProvider { kind: "store", ref id }) if id == "redis"
        );
        assert_matches!(registry.compressor("zstd").err(), Some(Error::UnknownProvider { kind: "compressor", .. }));
        assert!(registry.value_codec::<u64>("json").is_err());
    }

    #[test]
    fn test_codecs_are_typed() {
        let mut registry = ProviderRegistry::with_defaults();
        assert!(registry.value_codec::<String>("string").is_ok());
        assert!(registry.value_codec::<Vec<u8>>("string").is_err());

        registry.register_json_codec::<Vec<u32>>();
        let codec = registry.value_codec::<Vec<u32>>("json").unwrap();
        assert_eq!(codec.decode(&codec.encode(&vec![1, 2]).unwrap()).unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_from_settings_builds_cache() {
        let settings = CacheSettings::from_yaml(
            r#"
name: sessions
tiers:
  - provider: memory
  - provider: shared-memory
codec: string
compression: lz4
negative_caching: true
sync:
  transport: broadcast
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::with_defaults();
        let cache = CacheBuilder::<String, String>::from_settings(&settings, &registry)
            .unwrap()
            .display_keys()
            .build()
            .unwrap();

        assert_eq!(cache.config().sync_channel(), "cascache:sessions");
        assert!(cache.config().negative_caching());
        cache.put(&"s1".to_string(), "token".to_string()).await.unwrap();
        let value = cache.get(&"s1".to_string()).await.unwrap().unwrap();
        assert_eq!(value.value().map(String::as_str), Some("token"));
    }

    #[test]
    fn test_from_settings_unknown_transport() {
        let settings = CacheSettings::from_json(
            r#"{"name":"n","tiers":[{"provider":"memory"}],"sync":{"transport":"kafka"}}"#,
        )
        .unwrap();
        let err = CacheBuilder::<String, String>::from_settings(&settings, &ProviderRegistry::with_defaults())
            .err()
            .unwrap();
        assert_matches!(err, Error::UnknownProvider { kind: "transport", .. });
    }
}
