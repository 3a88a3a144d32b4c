//! Ingest front
//!
//! Per event: validate (pure), enrich (server timestamp + fingerprint),
//! encode and enqueue; alert-worthy events also publish a notification.
//! Events are validated independently so a batch can partially succeed.
//!
//! Backpressure is advisory here: the queue depth is read once per batch and
//! acceptance stops at the ceiling. A concurrent producer can race past it by
//! a batch; the hard stop is the storage worker's dead-letter path, not this
//! check.
//!
//! Enqueue is the only persistence-style action on the request path; nothing
//! in here waits on the store.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::core::config::IngestConfig;
use crate::data::cache::DailyUsage;
use crate::data::queue::{QueueError, QueueService};
use crate::data::topics::TopicService;
use crate::domain::events::{QueuedEvent, encoding, error_fingerprint, validate_event};
use crate::domain::notify::{ErrorNotification, channel_name, should_notify};

#[derive(Debug, Error)]
pub enum IngestError {
    /// Queue depth is at the ceiling; reject with a retry hint
    #[error("Service temporarily unavailable - queue full")]
    QueueFull {
        depth: u64,
        retry_after_secs: u64,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Per-batch outcome: how many events were enqueued, how many rejected, and
/// one reason line per rejection
#[derive(Debug, Default, serde::Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

pub struct IngestService {
    queue: Arc<QueueService>,
    topics: Arc<TopicService>,
    usage: Arc<DailyUsage>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        queue: Arc<QueueService>,
        topics: Arc<TopicService>,
        usage: Arc<DailyUsage>,
        config: IngestConfig,
    ) -> Self {
        Self {
            queue,
            topics,
            usage,
            config,
        }
    }

    /// Validate, enrich and enqueue a batch (a single event is a batch of
    /// one). Returns `QueueFull` only when the queue is already at the
    /// ceiling on entry; otherwise events are accepted up to the remaining
    /// room and the overflow is rejected per item.
    pub async fn ingest(
        &self,
        project_id: i64,
        raw_events: &[serde_json::Value],
    ) -> Result<IngestReport, IngestError> {
        let depth = self.queue.depth(project_id).await?;
        if depth >= self.config.queue_max_depth {
            tracing::warn!(project_id, depth, "Ingest rejected, queue at ceiling");
            return Err(IngestError::QueueFull {
                depth,
                retry_after_secs: self.config.backpressure_retry_secs,
            });
        }
        let room = (self.config.queue_max_depth - depth) as usize;

        let ingested_at = Utc::now();
        let mut payloads = Vec::with_capacity(raw_events.len().min(room));
        let mut notifications = Vec::new();
        let mut errors = Vec::new();
        let mut rejected = 0usize;

        for (index, raw) in raw_events.iter().enumerate() {
            let event = match validate_event(raw) {
                Ok(event) => event,
                Err(e) => {
                    rejected += 1;
                    errors.push(format!("log {index}: {e}"));
                    continue;
                }
            };

            if payloads.len() >= room {
                rejected += 1;
                errors.push(format!("log {index}: queue full"));
                continue;
            }

            let fingerprint = event.error_type.as_deref().map(|error_type| {
                error_fingerprint(
                    error_type,
                    event.stack_trace.as_deref(),
                    event.platform.as_deref(),
                )
            });

            let queued = QueuedEvent::from_event(event, project_id, ingested_at, fingerprint);

            match encoding::encode(&queued) {
                Ok(bytes) => {
                    if should_notify(queued.level, queued.log_type) {
                        notifications.push(ErrorNotification::from_queued(&queued));
                    }
                    payloads.push(bytes);
                }
                Err(e) => {
                    rejected += 1;
                    errors.push(format!("log {index}: {e}"));
                }
            }
        }

        let accepted = payloads.len();
        if accepted > 0 {
            self.queue.push(project_id, payloads).await?;
            self.usage.record(project_id, accepted as i64).await;
        }

        self.publish_notifications(project_id, notifications).await;

        tracing::debug!(project_id, accepted, rejected, "Ingest batch processed");

        Ok(IngestReport {
            accepted,
            rejected,
            errors: if errors.is_empty() { None } else { Some(errors) },
        })
    }

    pub async fn queue_depth(&self, project_id: i64) -> Result<u64, IngestError> {
        Ok(self.queue.depth(project_id).await?)
    }

    /// Publish failures are logged and swallowed; a broken notification bus
    /// must never fail an ingest that already enqueued its events.
    async fn publish_notifications(&self, project_id: i64, notifications: Vec<ErrorNotification>) {
        if notifications.is_empty() {
            return;
        }
        let topic = self
            .topics
            .broadcast_topic::<ErrorNotification>(&channel_name(project_id));
        for notification in &notifications {
            if let Err(e) = topic.publish(notification).await {
                tracing::warn!(project_id, error = %e, "Failed to publish error notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig};
    use crate::data::cache::CacheService;
    use crate::domain::events::decode;
    use serde_json::json;

    async fn service(queue_max_depth: u64) -> (IngestService, Arc<QueueService>, Arc<TopicService>) {
        let queue = Arc::new(QueueService::in_memory());
        let topics = Arc::new(TopicService::new());
        let cache = Arc::new(
            CacheService::new(&CacheConfig {
                backend: CacheBackendType::Memory,
                max_entries: 1000,
                redis_url: None,
            })
            .await
            .unwrap(),
        );
        let usage = Arc::new(DailyUsage::new(cache));
        let ingest = IngestService::new(
            Arc::clone(&queue),
            Arc::clone(&topics),
            usage,
            IngestConfig {
                queue_max_depth,
                max_batch_events: 1000,
                backpressure_retry_secs: 60,
            },
        );
        (ingest, queue, topics)
    }

    fn valid_event() -> serde_json::Value {
        json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "info",
            "log_type": "console",
            "importance": "standard",
            "message": "hello"
        })
    }

    fn error_event() -> serde_json::Value {
        json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "error",
            "log_type": "exception",
            "error_type": "ValueError",
            "error_message": "bad input",
            "stack_trace": "  File \"app.py\", line 10, in handler",
            "platform": "python"
        })
    }

    #[tokio::test]
    async fn test_single_event_accepted_and_enqueued() {
        let (ingest, queue, _) = service(100).await;

        let report = ingest.ingest(7, &[valid_event()]).await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 0);
        assert!(report.errors.is_none());
        assert_eq!(queue.depth(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_partial_success_on_validation() {
        let (ingest, queue, _) = service(100).await;

        let bad = json!({"level": "info"});
        let report = ingest
            .ingest(7, &[valid_event(), bad, valid_event()])
            .await
            .unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        let errors = report.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("log 1:"), "{}", errors[0]);
        assert_eq!(queue.depth(7).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_sets_fingerprint_iff_error_type() {
        let (ingest, queue, _) = service(100).await;

        ingest
            .ingest(7, &[valid_event(), error_event()])
            .await
            .unwrap();

        let payloads = queue.pop_batch(7, 10).await.unwrap();
        let plain = decode(&payloads[0]).unwrap();
        let errored = decode(&payloads[1]).unwrap();

        assert!(plain.error_fingerprint.is_none());
        let fp = errored.error_fingerprint.unwrap();
        assert_eq!(fp.len(), 64);
        assert!(errored.ingested_at >= errored.timestamp);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_at_ceiling() {
        let (ingest, _, _) = service(2).await;

        ingest
            .ingest(7, &[valid_event(), valid_event()])
            .await
            .unwrap();

        match ingest.ingest(7, &[valid_event()]).await {
            Err(IngestError::QueueFull {
                depth,
                retry_after_secs,
            }) => {
                assert_eq!(depth, 2);
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backpressure_partial_acceptance() {
        let (ingest, queue, _) = service(10).await;

        let batch: Vec<_> = (0..50).map(|_| valid_event()).collect();
        let report = ingest.ingest(7, &batch).await.unwrap();

        assert_eq!(report.accepted, 10);
        assert_eq!(report.rejected, 40);
        assert!(
            report.errors.unwrap().iter().all(|e| e.ends_with("queue full")),
            "overflow rejections should cite the queue"
        );
        assert_eq!(queue.depth(7).await.unwrap(), 10);

        // Once the worker drains below the ceiling, ingest accepts again
        queue.pop_batch(7, 10).await.unwrap();
        let report = ingest.ingest(7, &[valid_event()]).await.unwrap();
        assert_eq!(report.accepted, 1);
    }

    #[tokio::test]
    async fn test_error_event_publishes_notification() {
        let (ingest, _, topics) = service(100).await;

        let topic = topics.broadcast_topic::<ErrorNotification>(&channel_name(7));
        let mut subscriber = topic.subscribe().await.unwrap();

        ingest.ingest(7, &[error_event()]).await.unwrap();

        let notification =
            tokio::time::timeout(std::time::Duration::from_millis(200), subscriber.recv())
                .await
                .expect("notification should arrive promptly")
                .unwrap();
        assert_eq!(notification.project_id, 7);
        assert_eq!(notification.error_type.as_deref(), Some("ValueError"));
        assert!(notification.error_fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_info_event_does_not_notify() {
        let (ingest, _, topics) = service(100).await;

        let topic = topics.broadcast_topic::<ErrorNotification>(&channel_name(7));
        let mut subscriber = topic.subscribe().await.unwrap();

        ingest.ingest(7, &[valid_event()]).await.unwrap();

        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), subscriber.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_all_invalid_reports_zero_accepted() {
        let (ingest, queue, _) = service(100).await;

        let report = ingest
            .ingest(7, &[json!({"level": "info"}), json!("not an object")])
            .await
            .unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, 2);
        assert_eq!(queue.depth(7).await.unwrap(), 0);
    }
}
