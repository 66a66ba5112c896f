//! Domain Ports (Port/Adapter Pattern)
//!
//! Collaborator contracts the cache engine depends on. Adapters in
//! [`crate::adapters`] and the stores in [`crate::cache`] provide concrete
//! implementations; applications can supply their own.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Cache Engine                           │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  Store │ CacheLoader │ ValueCodec │ KeyCodec         │    │
//! │  │  ContainmentPredicate │ SyncPublisher │ Subscriber   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Adapters                              │
//! │  MemoryStore │ SharedMemoryStore │ JsonCodec │ BroadcastBus │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

// =============================================================================
// Store Port
// =============================================================================

/// One tier of a cache cascade.
///
/// Stores are keyed by encoded store keys and hold pipeline output bytes.
/// Implementations must be safe for concurrent use; no atomicity across
/// methods is required.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Look up a single key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Look up several keys; missing keys are omitted
    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store a single key
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Store several keys
    async fn put_all(&self, entries: HashMap<String, Bytes>) -> Result<()> {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    /// Remove a single key
    async fn evict(&self, key: &str) -> Result<()>;

    /// Remove several keys
    async fn evict_all(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.evict(key).await?;
        }
        Ok(())
    }

    /// Remove every key
    async fn clear(&self) -> Result<()>;
}

// =============================================================================
// Loader Port
// =============================================================================

/// Source-of-truth loader invoked on a full cache miss.
///
/// `Ok(None)` means the source has nothing for the key; it is cached as the
/// empty sentinel when negative caching is enabled.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Send,
{
    /// Load one key
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;

    /// Load several keys; keys with no value are omitted
    async fn load_all(&self, keys: &[K]) -> anyhow::Result<HashMap<K, V>> {
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key).await? {
                loaded.insert(key.clone(), value);
            }
        }
        Ok(loaded)
    }
}

/// Adapts an async closure into a [`CacheLoader`].
///
/// ```ignore
/// let loader = FnLoader::new(|id: u64| async move {
///     Ok::<_, anyhow::Error>(Some(format!("user-{}", id)))
/// });
/// ```
pub struct FnLoader<F> {
    f: F,
}

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<K, V, F, Fut> CacheLoader<K, V> for FnLoader<F>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        (self.f)(key.clone()).await
    }
}

// =============================================================================
// Codec Ports
// =============================================================================

/// Converts application values to bytes and back.
pub trait ValueCodec<V>: Send + Sync {
    /// Codec identifier
    fn name(&self) -> &'static str;

    /// Serialize a value
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    /// Deserialize a value
    fn decode(&self, data: &[u8]) -> Result<V>;
}

/// Converts application keys into store keys.
pub trait KeyCodec<K>: Send + Sync {
    /// Encode a key; an empty result is rejected by the cache
    fn encode(&self, key: &K) -> Result<String>;
}

// =============================================================================
// Containment Port
// =============================================================================

/// Cheap existence check consulted before invoking a loader.
///
/// Returning false short-circuits the loader (penetration protection).
pub trait ContainmentPredicate: Send + Sync {
    fn test(&self, cache_name: &str, key: &str) -> bool;
}

// =============================================================================
// Sync Ports
// =============================================================================

/// Broadcasts encoded sync messages to peer instances.
#[async_trait]
pub trait SyncPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;
}

/// Receives raw sync payloads for a subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, payload: Bytes);
}

/// Registers handlers for a channel.
///
/// Delivery runs on a task owned by the transport until `shutdown` is
/// cancelled.
pub trait SyncSubscriber: Send + Sync {
    fn register(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}
