//! Sync Publisher Adapters
//!
//! Implements the `SyncPublisher` port with logging, in-memory and fan-out
//! backends.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info};

use crate::domain::events::{SyncMessage, SyncOp};
use crate::domain::ports::SyncPublisher;
use crate::error::Result;

/// Logging-based sync publisher.
///
/// Writes every notification to the tracing system and delivers nothing.
/// Useful for single-instance deployments and debugging.
#[derive(Debug, Clone, Default)]
pub struct LoggingSyncPublisher {
    /// Whether to log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingSyncPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Create a publisher that logs at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl SyncPublisher for LoggingSyncPublisher {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let body = String::from_utf8_lossy(&payload);
        if self.info_level {
            info!(channel, message = %body, "Sync notification");
        } else {
            debug!(channel, message = %body, "Sync notification");
        }
        Ok(())
    }
}

/// In-memory sync collector for testing.
///
/// Records published payloads for later inspection.
#[derive(Debug, Default)]
pub struct InMemorySyncCollector {
    published: parking_lot::RwLock<Vec<(String, Bytes)>>,
}

impl InMemorySyncCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded messages, in publish order. Undecodable payloads are skipped.
    pub fn messages(&self) -> Vec<SyncMessage> {
        self.published
            .read()
            .iter()
            .filter_map(|(_, payload)| SyncMessage::from_bytes(payload).ok())
            .collect()
    }

    /// Messages of one operation kind.
    pub fn messages_of(&self, op: SyncOp) -> Vec<SyncMessage> {
        self.messages().into_iter().filter(|m| m.op == op).collect()
    }

    /// Channels published to, in order.
    pub fn channels(&self) -> Vec<String> {
        self.published.read().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }

    pub fn clear(&self) {
        self.published.write().clear();
    }
}

#[async_trait]
impl SyncPublisher for InMemorySyncCollector {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.published.write().push((channel.to_string(), payload));
        Ok(())
    }
}

/// Composite publisher that forwards to multiple backends.
///
/// Backends are published to concurrently; the first failure is returned.
#[derive(Default)]
pub struct CompositeSyncPublisher {
    publishers: Vec<Box<dyn SyncPublisher>>,
}

impl CompositeSyncPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: SyncPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }
}

impl std::fmt::Debug for CompositeSyncPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSyncPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl SyncPublisher for CompositeSyncPublisher {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let results = join_all(
            self.publishers
                .iter()
                .map(|publisher| publisher.publish(channel, payload.clone())),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use uuid::Uuid;

    struct Unreachable;

    #[async_trait]
    impl SyncPublisher for Unreachable {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<()> {
            Err(Error::SyncTransport("connection refused".into()))
        }
    }

    fn evict_payload(key: &str) -> Bytes {
        SyncMessage::keyed(Uuid::new_v4(), "users", SyncOp::Evict, vec![key.into()])
            .to_bytes()
            .unwrap()
    }

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingSyncPublisher::info_level();
        publisher
            .publish("cascache:users", evict_payload("u:1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemorySyncCollector::new();
        assert!(collector.is_empty());

        collector.publish("c", evict_payload("u:1")).await.unwrap();
        let clear = SyncMessage::clear(Uuid::new_v4(), "users").to_bytes().unwrap();
        collector.publish("c", clear).await.unwrap();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.messages_of(SyncOp::Evict).len(), 1);
        assert_eq!(collector.messages_of(SyncOp::Clear).len(), 1);
        assert_eq!(collector.channels(), vec!["c".to_string(), "c".to_string()]);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_composite_attempts_every_backend() {
        let composite = CompositeSyncPublisher::new()
            .with_publisher(Unreachable)
            .with_publisher(LoggingSyncPublisher::debug_level());

        let err = composite.publish("c", evict_payload("u:1")).await.unwrap_err();
        assert!(matches!(err, Error::SyncTransport(_)));
    }
}
