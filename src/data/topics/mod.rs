//! Notification bus
//!
//! Fire-and-forget broadcast topics with pluggable backends:
//! - In-memory (default): local `tokio::broadcast` channels
//! - Redis: Pub/Sub, so every gateway instance sees events from any worker
//!
//! Carries the per-project error-notification channels
//! (`notifications:errors:{project_id}`) consumed by the SSE endpoint.
//! Delivery is best-effort by contract: no persistence, no resume cursor,
//! and a lagging subscriber loses the oldest buffered messages.

mod backend;
mod error;
mod memory;
mod pubsub;
mod redis;

use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{BroadcastSubscription, TopicBackend};
pub use error::TopicError;
pub use memory::MemoryTopicBackend;

use crate::core::config::{CacheBackendType, CacheConfig};

pub struct TopicService {
    backend: Arc<dyn TopicBackend>,
    redis_backend: Option<Arc<redis::RedisTopicBackend>>,
}

impl Default for TopicService {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicService {
    /// In-memory service (single process, tests)
    pub fn new() -> Self {
        Self {
            backend: Arc::new(MemoryTopicBackend::new()),
            redis_backend: None,
        }
    }

    /// Backend selection follows the cache backend configuration
    pub async fn from_cache_config(config: &CacheConfig) -> Result<Self, TopicError> {
        match config.backend {
            CacheBackendType::Memory => Ok(Self::new()),
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    TopicError::Config("redis_url required for Redis backend".into())
                })?;
                let backend = Arc::new(redis::RedisTopicBackend::new(url).await?);
                Ok(Self {
                    backend: backend.clone(),
                    redis_backend: Some(backend),
                })
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Typed broadcast topic handle (MessagePack-encoded payloads)
    pub fn broadcast_topic<T>(&self, name: &str) -> BroadcastTopic<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        BroadcastTopic {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            _phantom: PhantomData,
        }
    }

    pub async fn health_check(&self) -> Result<(), TopicError> {
        self.backend.health_check().await
    }

    /// Stop bridge tasks (Redis backend); memory backend has nothing to stop
    pub async fn shutdown(&self) {
        if let Some(redis) = &self.redis_backend {
            redis.shutdown().await;
        }
    }
}

/// Handle to a named broadcast topic
pub struct BroadcastTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    name: String,
    backend: Arc<dyn TopicBackend>,
    _phantom: PhantomData<T>,
}

impl<T> BroadcastTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Publish a message (fire-and-forget)
    pub async fn publish(&self, msg: &T) -> Result<(), TopicError> {
        let payload =
            rmp_serde::to_vec(msg).map_err(|e| TopicError::Serialization(e.to_string()))?;
        self.backend.publish(&self.name, &payload).await
    }

    pub async fn subscribe(&self) -> Result<BroadcastTopicSubscriber<T>, TopicError> {
        let subscription = self.backend.subscribe(&self.name).await?;
        Ok(BroadcastTopicSubscriber {
            subscription,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct BroadcastTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    subscription: BroadcastSubscription,
    _phantom: PhantomData<T>,
}

impl<T> BroadcastTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn recv(&mut self) -> Result<T, TopicError> {
        if let Some(result) = self.subscription.receiver.next().await {
            let payload = result?;
            let decoded: T = rmp_serde::from_slice(&payload)
                .map_err(|e| TopicError::Serialization(e.to_string()))?;
            Ok(decoded)
        } else {
            Err(TopicError::ChannelClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestNotification {
        project_id: i64,
        fingerprint: String,
    }

    #[tokio::test]
    async fn test_typed_publish_subscribe() {
        let service = TopicService::new();
        let topic = service.broadcast_topic::<TestNotification>("notifications:errors:1");

        let mut subscriber = topic.subscribe().await.unwrap();

        let msg = TestNotification {
            project_id: 1,
            fingerprint: "abc123".into(),
        };
        topic.publish(&msg).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_message() {
        let service = TopicService::new();
        let topic = service.broadcast_topic::<TestNotification>("notifications:errors:2");

        let mut sub1 = topic.subscribe().await.unwrap();
        let mut sub2 = topic.subscribe().await.unwrap();

        let msg = TestNotification {
            project_id: 2,
            fingerprint: "def456".into(),
        };
        topic.publish(&msg).await.unwrap();

        let r1 = tokio::time::timeout(Duration::from_millis(200), sub1.recv())
            .await
            .unwrap()
            .unwrap();
        let r2 = tokio::time::timeout(Duration::from_millis(200), sub2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r1, msg);
        assert_eq!(r2, msg);
    }

    #[tokio::test]
    async fn test_backend_name() {
        assert_eq!(TopicService::new().backend_name(), "memory");
    }
}
