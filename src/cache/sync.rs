//! Cross-Instance Sync
//!
//! Publish side: after a write, evict or clear has landed on every tier, a
//! [`SyncNotifier`] broadcasts a [`SyncMessage`] tagged with this instance's
//! id. Failures are logged and counted, never surfaced.
//!
//! Consume side: a [`SyncConsumer`] applies peers' messages to the fastest
//! tier only. Slower tiers are shared and already hold the peer's write.
//! Peer PUTs become local evicts, so the next read pulls the current value.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use super::metrics::CacheMetrics;
use crate::domain::events::{SyncMessage, SyncOp};
use crate::domain::ports::{MessageHandler, Store, SyncPublisher};
use crate::error::Result;

/// Publishes sync notifications for one cache
pub struct SyncNotifier {
    publisher: Option<Arc<dyn SyncPublisher>>,
    channel: String,
    cache_name: String,
    instance_id: Uuid,
    metrics: Arc<CacheMetrics>,
}

impl SyncNotifier {
    pub fn new(
        publisher: Option<Arc<dyn SyncPublisher>>,
        channel: impl Into<String>,
        cache_name: impl Into<String>,
        instance_id: Uuid,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            publisher,
            channel: channel.into(),
            cache_name: cache_name.into(),
            instance_id,
            metrics,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Announce a keyed operation
    pub async fn notify(&self, op: SyncOp, keys: Vec<String>) {
        if self.publisher.is_none() || keys.is_empty() {
            return;
        }
        let message = SyncMessage::keyed(self.instance_id, self.cache_name.clone(), op, keys);
        self.send(message).await;
    }

    /// Announce a clear
    pub async fn notify_clear(&self) {
        if self.publisher.is_none() {
            return;
        }
        let message = SyncMessage::clear(self.instance_id, self.cache_name.clone());
        self.send(message).await;
    }

    async fn send(&self, message: SyncMessage) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let result = match message.to_bytes() {
            Ok(payload) => publisher.publish(&self.channel, payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.metrics.record_sync_published();
                debug!(channel = %self.channel, op = %message.op, keys = message.keys().len(), "Published sync notification");
            }
            Err(e) => {
                self.metrics.record_sync_publish_failure();
                warn!(channel = %self.channel, op = %message.op, error = %e, "Sync publish failed, peers stay stale until expiry");
            }
        }
    }
}

impl std::fmt::Debug for SyncNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncNotifier")
            .field("channel", &self.channel)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Applies peers' sync messages to the local fastest tier
pub struct SyncConsumer {
    cache_name: String,
    instance_id: Uuid,
    local: Arc<dyn Store>,
    metrics: Arc<CacheMetrics>,
}

impl SyncConsumer {
    pub fn new(
        cache_name: impl Into<String>,
        instance_id: Uuid,
        local: Arc<dyn Store>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            instance_id,
            local,
            metrics,
        }
    }

    /// Apply one message. Returns false if it was ignored.
    pub async fn apply(&self, message: &SyncMessage) -> Result<bool> {
        if message.origin == self.instance_id || message.cache != self.cache_name {
            self.metrics.record_sync_ignored();
            return Ok(false);
        }

        match message.op {
            SyncOp::Put | SyncOp::Evict => {
                for key in message.keys() {
                    self.local.evict(key).await?;
                }
            }
            SyncOp::PutAll | SyncOp::EvictAll => {
                if !message.keys().is_empty() {
                    self.local.evict_all(message.keys()).await?;
                }
            }
            SyncOp::Clear => self.local.clear().await?,
        }

        self.metrics.record_sync_applied();
        debug!(
            cache = %self.cache_name,
            op = %message.op,
            origin = %message.origin,
            keys = message.keys().len(),
            "Applied peer sync notification"
        );
        Ok(true)
    }
}

#[async_trait]
impl MessageHandler for SyncConsumer {
    async fn on_message(&self, payload: Bytes) {
        let message = match SyncMessage::from_bytes(&payload) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_sync_malformed();
                warn!(cache = %self.cache_name, error = %e, "Discarding malformed sync payload");
                return;
            }
        };

        if let Err(e) = self.apply(&message).await {
            warn!(cache = %self.cache_name, op = %message.op, error = %e, "Failed to apply sync notification");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::event_publisher::InMemorySyncCollector;
    use crate::adapters::shared_store::SharedMemoryStore;
    use crate::error::Error;

    fn consumer() -> (SyncConsumer, Arc<SharedMemoryStore>, Uuid, Arc<CacheMetrics>) {
        let local = Arc::new(SharedMemoryStore::new("local"));
        let id = Uuid::new_v4();
        let metrics = Arc::new(CacheMetrics::new());
        let consumer = SyncConsumer::new(
            "users",
            id,
            Arc::clone(&local) as Arc<dyn Store>,
            Arc::clone(&metrics),
        );
        (consumer, local, id, metrics)
    }

    async fn seed(store: &SharedMemoryStore, keys: &[&str]) {
        for key in keys {
            store.put(key, Bytes::from_static(b"v")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_peer_evict_is_idempotent() {
        let (consumer, local, _, _) = consumer();
        seed(&local, &["u:1", "u:2"]).await;
        let message = SyncMessage::keyed(Uuid::new_v4(), "users", SyncOp::Evict, vec!["u:1".into()]);

        assert!(consumer.apply(&message).await.unwrap());
        assert!(!local.contains("u:1"));
        assert!(consumer.apply(&message).await.unwrap());
        assert!(!local.contains("u:1"));
        assert!(local.contains("u:2"));
    }

    #[tokio::test]
    async fn test_peer_put_becomes_local_evict() {
        let (consumer, local, _, _) = consumer();
        seed(&local, &["u:1", "u:2", "u:3"]).await;

        let put = SyncMessage::keyed(Uuid::new_v4(), "users", SyncOp::Put, vec!["u:1".into()]);
        let put_all = SyncMessage::keyed(
            Uuid::new_v4(),
            "users",
            SyncOp::PutAll,
            vec!["u:2".into(), "u:3".into()],
        );
        consumer.apply(&put).await.unwrap();
        consumer.apply(&put_all).await.unwrap();
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_self_originated_message_ignored() {
        let (consumer, local, id, metrics) = consumer();
        seed(&local, &["u:1"]).await;

        assert!(!consumer.apply(&SyncMessage::clear(id, "users")).await.unwrap());
        assert!(local.contains("u:1"));
        assert_eq!(metrics.snapshot().sync_ignored, 1);
    }

    #[tokio::test]
    async fn test_other_cache_ignored() {
        let (consumer, local, _, _) = consumer();
        seed(&local, &["u:1"]).await;
        let message = SyncMessage::clear(Uuid::new_v4(), "orders");
        assert!(!consumer.apply(&message).await.unwrap());
        assert!(local.contains("u:1"));
    }

    #[tokio::test]
    async fn test_peer_clear() {
        let (consumer, local, _, _) = consumer();
        seed(&local, &["u:1", "u:2"]).await;
        consumer
            .on_message(SyncMessage::clear(Uuid::new_v4(), "users").to_bytes().unwrap())
            .await;
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_counted() {
        let (consumer, _, _, metrics) = consumer();
        consumer.on_message(Bytes::from_static(b"{not json")).await;
        assert_eq!(metrics.snapshot().sync_malformed, 1);
    }

    #[tokio::test]
    async fn test_local_store_failure_propagates_from_apply() {
        let (consumer, local, _, _) = consumer();
        local.set_failing(true);
        let message = SyncMessage::keyed(Uuid::new_v4(), "users", SyncOp::Evict, vec!["u:1".into()]);
        assert!(matches!(consumer.apply(&message).await, Err(Error::Store { .. })));
        // The handler path swallows it
        consumer.on_message(message.to_bytes().unwrap()).await;
    }

    #[tokio::test]
    async fn test_notifier_tags_origin_and_channel() {
        let collector = Arc::new(InMemorySyncCollector::new());
        let id = Uuid::new_v4();
        let metrics = Arc::new(CacheMetrics::new());
        let notifier = SyncNotifier::new(
            Some(Arc::clone(&collector) as Arc<dyn SyncPublisher>),
            "cascache:users",
            "users",
            id,
            Arc::clone(&metrics),
        );

        notifier.notify(SyncOp::Evict, vec!["u:1".into()]).await;
        notifier.notify(SyncOp::EvictAll, vec![]).await;
        notifier.notify_clear().await;

        let messages = collector.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.origin == id && m.cache == "users"));
        assert_eq!(collector.channels()[0], "cascache:users");
        assert_eq!(metrics.snapshot().sync_published, 2);
    }

    struct Down;

    #[async_trait]
    impl SyncPublisher for Down {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<()> {
            Err(Error::SyncTransport("broker unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let metrics = Arc::new(CacheMetrics::new());
        let notifier = SyncNotifier::new(
            Some(Arc::new(Down) as Arc<dyn SyncPublisher>),
            "c",
            "users",
            Uuid::new_v4(),
            Arc::clone(&metrics),
        );
        notifier.notify_clear().await;
        assert_eq!(metrics.snapshot().sync_publish_failures, 1);
    }
}
