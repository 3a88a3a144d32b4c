//! In-memory topic backend
//!
//! One `tokio::broadcast` channel per topic. Bounded per-subscriber buffers:
//! a lagging subscriber observes `Lagged(n)` and continues from newer
//! messages, so one slow consumer never blocks the channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::backend::{BroadcastSubscription, TopicBackend};
use super::error::TopicError;

/// Per-topic broadcast buffer size
const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

pub struct MemoryTopicBackend {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for MemoryTopicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopicBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn get_or_create(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        {
            let channels = self.channels.read();
            if let Some(sender) = channels.get(topic) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write();
        // Double-check after acquiring the write lock
        if let Some(sender) = channels.get(topic) {
            return sender.clone();
        }

        let (sender, _) = broadcast::channel(self.capacity);
        channels.insert(topic.to_string(), sender.clone());
        sender
    }

    /// Active subscriber count for a topic (test instrumentation)
    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .read()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TopicBackend for MemoryTopicBackend {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError> {
        let sender = self.get_or_create(topic);
        // No subscribers is fine for fire-and-forget
        let _ = sender.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BroadcastSubscription, TopicError> {
        let sender = self.get_or_create(topic);
        let mut receiver = sender.subscribe();

        let stream = stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(TopicError::Lagged(n));
                    }
                }
            }
        };

        Ok(BroadcastSubscription {
            receiver: Box::pin(stream),
        })
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let backend = MemoryTopicBackend::new();

        let sub = backend.subscribe("notifications:errors:1").await.unwrap();
        let mut receiver = sub.receiver;

        backend
            .publish("notifications:errors:1", b"payload")
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_millis(100), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg, b"payload");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let backend = MemoryTopicBackend::new();
        backend.publish("empty", b"dropped").await.unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let backend = MemoryTopicBackend::new();

        let mut sub1 = backend.subscribe("notifications:errors:1").await.unwrap();
        let mut sub2 = backend.subscribe("notifications:errors:2").await.unwrap();

        backend
            .publish("notifications:errors:1", b"for-project-1")
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_millis(100), sub1.receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg, b"for-project-1");

        let nothing =
            tokio::time::timeout(Duration::from_millis(50), sub2.receiver.next()).await;
        assert!(nothing.is_err(), "project 2 must not see project 1 events");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking_others() {
        // Tiny buffer: the non-draining subscriber overflows and observes
        // Lagged, while the draining subscriber keeps receiving everything.
        let backend = MemoryTopicBackend::with_capacity(4);

        let mut fast = backend.subscribe("t").await.unwrap();
        let _slow = backend.subscribe("t").await.unwrap();

        for i in 0..32u8 {
            backend.publish("t", &[i]).await.unwrap();
            let msg = tokio::time::timeout(Duration::from_millis(100), fast.receiver.next())
                .await
                .expect("fast subscriber should keep receiving")
                .unwrap()
                .unwrap();
            assert_eq!(msg, vec![i]);
        }

        assert_eq!(backend.subscriber_count("t"), 2);
    }
}
