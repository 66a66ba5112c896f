//! Broadcast Bus
//!
//! In-process pub/sub transport on tokio broadcast channels. Every cache
//! sharing one `BroadcastBus` sees every other cache's notifications, which
//! models several processes subscribed to the same remote channel.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::ports::{MessageHandler, SyncPublisher, SyncSubscriber};
use crate::error::{Error, Result};

/// Default per-channel buffer
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// In-process publish/subscribe transport
pub struct BroadcastBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Current subscriber count for a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SyncPublisher for BroadcastBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        // No subscribers is not a failure: nobody needs invalidating.
        if self.sender(channel).send(payload).is_err() {
            debug!(channel, "Published sync notification with no subscribers");
        }
        Ok(())
    }
}

impl SyncSubscriber for BroadcastBus {
    fn register(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::SyncTransport(format!("no async runtime for subscriber: {}", e)))?;

        let mut rx = self.sender(channel).subscribe();
        let channel = channel.to_string();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(channel = %channel, "Sync subscriber stopped");
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(payload) => handler.on_message(payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "Sync subscriber lagged, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: parking_lot::Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, payload: Bytes) {
            self.seen.lock().push(payload);
        }
    }

    async fn wait_for(recorder: &Recorder, n: usize) {
        for _ in 0..100 {
            if recorder.seen.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = BroadcastBus::new();
        let shutdown = CancellationToken::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        bus.register("ch", a.clone(), shutdown.clone()).unwrap();
        bus.register("ch", b.clone(), shutdown.clone()).unwrap();
        assert_eq!(bus.subscriber_count("ch"), 2);

        bus.publish("ch", Bytes::from_static(b"hello")).await.unwrap();
        wait_for(&a, 1).await;
        wait_for(&b, 1).await;

        assert_eq!(a.seen.lock().len(), 1);
        assert_eq!(b.seen.lock()[0].as_ref(), b"hello");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = BroadcastBus::new();
        let shutdown = CancellationToken::new();
        let recorder = Arc::new(Recorder::default());
        bus.register("users", recorder.clone(), shutdown.clone()).unwrap();

        bus.publish("orders", Bytes::from_static(b"x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(recorder.seen.lock().is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = BroadcastBus::new();
        bus.publish("nobody", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_detaches() {
        let bus = BroadcastBus::new();
        let shutdown = CancellationToken::new();
        bus.register("ch", Arc::new(Recorder::default()), shutdown.clone())
            .unwrap();
        assert_eq!(bus.subscriber_count("ch"), 1);

        shutdown.cancel();
        for _ in 0..100 {
            if bus.subscriber_count("ch") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.subscriber_count("ch"), 0);
    }

    #[test]
    fn test_register_outside_runtime_fails() {
        let bus = BroadcastBus::new();
        let err = bus
            .register("ch", Arc::new(Recorder::default()), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::SyncTransport(_)));
    }
}
