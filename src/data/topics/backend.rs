//! Topic backend trait definition
//!
//! Broadcast (pub/sub) semantics only: fire-and-forget, every active
//! subscriber receives each message, nothing is persisted. This carries the
//! error-notification channels consumed by SSE; queued log delivery lives in
//! `data::queue` with its own at-least-once contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::TopicError;

/// Subscription to a broadcast topic
pub struct BroadcastSubscription {
    /// Stream of received payloads. A `Lagged` item means the subscriber was
    /// too slow and the oldest buffered messages were dropped for it.
    pub receiver: Pin<Box<dyn Stream<Item = Result<Vec<u8>, TopicError>> + Send>>,
}

#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Publish to a topic. Succeeds even with zero subscribers (the message
    /// is dropped); publish failures never propagate into callers' work.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError>;

    /// Subscribe to a topic. Per-subscriber buffers are bounded; slow
    /// consumers lag and lose the oldest messages rather than blocking
    /// anyone else.
    async fn subscribe(&self, topic: &str) -> Result<BroadcastSubscription, TopicError>;

    async fn health_check(&self) -> Result<(), TopicError>;

    fn backend_name(&self) -> &'static str;
}
