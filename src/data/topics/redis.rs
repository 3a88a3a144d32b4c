//! Redis topic backend using Pub/Sub
//!
//! `PUBLISH` for publishing; subscriptions go through one bridge task per
//! topic (see `pubsub`). The bridge holds a dedicated connection, forwards
//! into the local broadcast channel, and reconnects with a delay on errors.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;

use super::backend::{BroadcastSubscription, TopicBackend};
use super::error::TopicError;
use super::pubsub::{ManagedSubscription, PubSubManager};

/// Reconnection delay for pub/sub after an error
const PUBSUB_RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

pub struct RedisTopicBackend {
    pool: Pool,
    /// URL kept for dedicated pub/sub connections (SUBSCRIBE can't share
    /// pooled command connections)
    redis_url: String,
    pubsub_manager: Arc<PubSubManager>,
}

impl RedisTopicBackend {
    pub async fn new(redis_url: &str) -> Result<Self, TopicError> {
        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 32,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| TopicError::Connection(format!("Failed to create Redis pool: {e}")))?;

        let mut conn = pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;

        tracing::debug!("Redis topic backend connected");

        Ok(Self {
            pool,
            redis_url: redis_url.to_string(),
            pubsub_manager: Arc::new(PubSubManager::new(DEFAULT_BROADCAST_CAPACITY)),
        })
    }

    fn start_bridge_task(&self, topic: &str) {
        let (bridge, is_new) = self.pubsub_manager.get_or_create_bridge(topic);

        if !is_new && bridge.is_task_running() {
            return;
        }

        let channel = topic.to_string();
        let redis_url = self.redis_url.clone();
        let bridge_clone = Arc::clone(&bridge);

        let handle = tokio::spawn(async move {
            Self::run_bridge_task(redis_url, channel, bridge_clone).await;
        });

        bridge.set_task(handle);
    }

    async fn run_bridge_task(
        redis_url: String,
        channel: String,
        bridge: Arc<super::pubsub::PubSubBridge>,
    ) {
        tracing::debug!(channel = %channel, "Starting Redis pub/sub bridge");

        let mut stop_rx = bridge.stop_rx();
        let mut shutdown_rx = bridge.shutdown_rx();

        'outer: loop {
            if *stop_rx.borrow() || *shutdown_rx.borrow() {
                break;
            }

            let client = match deadpool_redis::redis::Client::open(redis_url.as_str()) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, channel = %channel, "Failed to create pub/sub client, retrying...");
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
                    }
                }
            };

            let mut pubsub = match client.get_async_pubsub().await {
                Ok(ps) => ps,
                Err(e) => {
                    tracing::warn!(error = %e, channel = %channel, "Failed to get pub/sub connection, retrying...");
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
                    }
                }
            };

            if let Err(e) = pubsub.subscribe(&channel).await {
                tracing::warn!(error = %e, channel = %channel, "Failed to subscribe, retrying...");
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
                }
            }

            tracing::debug!(channel = %channel, "Redis pub/sub bridge connected");

            let mut msg_stream = pubsub.on_message();
            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break 'outer;
                        }
                    }

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break 'outer;
                        }
                    }

                    msg_opt = msg_stream.next() => {
                        match msg_opt {
                            Some(msg) => {
                                let payload: Vec<u8> = match msg.get_payload() {
                                    Ok(p) => p,
                                    Err(e) => {
                                        tracing::warn!(error = %e, channel = %channel, "Failed to get message payload");
                                        continue;
                                    }
                                };
                                // No receivers is fine for fire-and-forget
                                let _ = bridge.send(payload);
                            }
                            None => {
                                tracing::warn!(channel = %channel, "Redis pub/sub stream ended, reconnecting...");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => {}
            }
        }

        tracing::debug!(channel = %channel, "Redis pub/sub bridge stopped");
    }

    pub async fn shutdown(&self) {
        self.pubsub_manager.shutdown().await;
    }
}

#[async_trait]
impl TopicBackend for RedisTopicBackend {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError> {
        let mut conn = self.pool.get().await?;

        // PUBLISH to Redis only; subscribers are fed by the bridge task, so
        // same-process publishes are not delivered twice
        let _: i64 = deadpool_redis::redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BroadcastSubscription, TopicError> {
        let (bridge, is_new) = self.pubsub_manager.get_or_create_bridge(topic);

        if is_new {
            self.start_bridge_task(topic);
        }

        bridge.add_subscriber();
        let receiver = bridge.subscribe();

        let managed = ManagedSubscription::new(
            receiver,
            Arc::clone(&bridge),
            Arc::clone(&self.pubsub_manager),
        );

        let stream = stream! {
            let mut managed = managed;
            loop {
                match managed.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
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
        let mut conn = self.pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
