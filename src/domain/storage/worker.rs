//! Storage workers
//!
//! A bounded pool of drain loops, one task per worker, sized to the
//! database connection budget. Each loop pops a batch from a project queue
//! (up to `batch_max` items or `flush_interval` after the first item,
//! whichever comes first) and flushes it: decode, route into monthly
//! partitions, streaming bulk insert, error-group upserts, throughput
//! metrics.
//!
//! Loss accounting: every popped payload ends in exactly one of persisted,
//! dead-lettered, or pushed back onto the queue. Re-delivery duplicates are
//! the at-least-once contract, losing an item is a bug.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::core::config::StorageConfig;
use crate::core::shutdown::ShutdownService;
use crate::data::postgres::repositories::dead_letter::{self, DeadLetter};
use crate::data::postgres::repositories::error_groups::{self, ErrorGroupUpsert};
use crate::data::postgres::repositories::logs;
use crate::data::postgres::repositories::metrics::{self, IngestionMetric};
use crate::data::postgres::partitions::{
    INGESTION_METRICS_TABLE, LOGS_TABLE, PartitionManager, partition_for_timestamp,
};
use crate::data::postgres::PostgresService;
use crate::data::queue::QueueService;
use crate::domain::events::{QueuedEvent, decode};
use crate::utils::retry::retry_with_backoff;

pub struct StorageWorkerPool {
    queue: Arc<QueueService>,
    logs_db: Arc<PostgresService>,
    partitions: Arc<PartitionManager>,
    config: StorageConfig,
}

impl StorageWorkerPool {
    pub fn new(
        queue: Arc<QueueService>,
        logs_db: Arc<PostgresService>,
        partitions: Arc<PartitionManager>,
        config: StorageConfig,
    ) -> Self {
        Self {
            queue,
            logs_db,
            partitions,
            config,
        }
    }

    pub async fn start(&self, shutdown: &ShutdownService) {
        for worker_id in 0..self.config.worker_count {
            let worker = StorageWorker {
                worker_id: worker_id as i32,
                queue: Arc::clone(&self.queue),
                logs_db: Arc::clone(&self.logs_db),
                partitions: Arc::clone(&self.partitions),
                config: self.config.clone(),
            };
            let shutdown_rx = shutdown.subscribe();
            shutdown
                .register(tokio::spawn(async move {
                    worker.run(shutdown_rx).await;
                }))
                .await;
        }
        tracing::info!(workers = self.config.worker_count, "Storage workers started");
    }
}

struct StorageWorker {
    worker_id: i32,
    queue: Arc<QueueService>,
    logs_db: Arc<PostgresService>,
    partitions: Arc<PartitionManager>,
    config: StorageConfig,
}

impl StorageWorker {
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker_id = self.worker_id, "Storage worker started");
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *shutdown_rx.borrow() {
                self.drain_on_shutdown().await;
                break;
            }

            let projects = match self.queue.active_projects().await {
                Ok(projects) => projects,
                Err(e) => {
                    tracing::error!(worker_id = self.worker_id, error = %e, "Queue scan failed");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            if projects.is_empty() {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    _ = self.queue.wait_for_items(poll_interval) => {}
                }
                continue;
            }

            for project_id in projects {
                if *shutdown_rx.borrow() {
                    break;
                }
                let batch = self.collect_batch(project_id).await;
                if !batch.is_empty() {
                    self.flush(project_id, batch).await;
                }
            }
        }

        tracing::info!(worker_id = self.worker_id, "Storage worker stopped");
    }

    /// Pop up to `batch_max` items, waiting at most `flush_interval` after
    /// the first item for the batch to fill
    async fn collect_batch(&self, project_id: i64) -> Vec<Vec<u8>> {
        let mut batch = match self.queue.pop_batch(project_id, self.config.batch_max).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(project_id, error = %e, "Queue pop failed");
                return Vec::new();
            }
        };

        if batch.is_empty() || batch.len() >= self.config.batch_max {
            return batch;
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.flush_interval_ms);
        while batch.len() < self.config.batch_max {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self
                .queue
                .pop_batch(project_id, self.config.batch_max - batch.len())
                .await
            {
                Ok(more) if !more.is_empty() => batch.extend(more),
                Ok(_) => self.queue.wait_for_items(remaining).await,
                Err(e) => {
                    tracing::error!(project_id, error = %e, "Queue pop failed mid-batch");
                    break;
                }
            }
        }

        batch
    }

    /// On shutdown, flush whatever is already queued so popped items are
    /// never abandoned
    async fn drain_on_shutdown(&self) {
        tracing::debug!(worker_id = self.worker_id, "Draining queues before shutdown");
        let Ok(projects) = self.queue.active_projects().await else {
            return;
        };
        for project_id in projects {
            loop {
                let batch = match self.queue.pop_batch(project_id, self.config.batch_max).await {
                    Ok(batch) if !batch.is_empty() => batch,
                    _ => break,
                };
                self.flush(project_id, batch).await;
            }
        }
    }

    async fn flush(&self, project_id: i64, payloads: Vec<Vec<u8>>) {
        let started = Instant::now();
        let popped = payloads.len();
        let pool = self.logs_db.pool();

        // 1. Decode; undecodable payloads go straight to dead letter
        let mut dead: Vec<DeadLetter> = Vec::new();
        let mut pending: Vec<(Vec<u8>, QueuedEvent)> = Vec::with_capacity(popped);
        for payload in payloads {
            match decode(&payload) {
                Ok(event) => pending.push((payload, event)),
                Err(e) => dead.push(DeadLetter {
                    project_id: Some(project_id),
                    payload,
                    reason: format!("decode: {e}"),
                }),
            }
        }

        // 2. Route into partition groups
        let groups = group_by_partition(pending);

        let mut flushed: u64 = 0;
        let mut requeue: Vec<Vec<u8>> = Vec::new();
        let mut persisted: Vec<QueuedEvent> = Vec::new();

        for (partition, group) in groups {
            // Ensure the target partition exists (cached after first check)
            let ensure = retry_with_backoff(
                self.config.retry_max_attempts,
                self.config.retry_base_delay_ms,
                || {
                    self.partitions
                        .ensure_for_timestamp(LOGS_TABLE, group[0].1.timestamp)
                },
            )
            .await;
            if let Err((e, attempts)) = ensure {
                tracing::error!(
                    partition = %partition,
                    error = %e,
                    attempts,
                    "Partition creation failed, requeueing sub-batch"
                );
                requeue.extend(group.into_iter().map(|(payload, _)| payload));
                continue;
            }

            // 3. Streaming bulk insert; on failure split into single-row
            // inserts so one bad row cannot sink the batch
            let events: Vec<QueuedEvent> = group.iter().map(|(_, e)| e.clone()).collect();
            let insert = retry_with_backoff(
                self.config.retry_max_attempts,
                self.config.retry_base_delay_ms,
                || logs::bulk_insert(pool, &events),
            )
            .await;

            match insert {
                Ok((rows, _)) => {
                    flushed += rows;
                    persisted.extend(events);
                }
                Err((e, attempts)) => {
                    tracing::warn!(
                        partition = %partition,
                        error = %e,
                        attempts,
                        "Bulk insert failed, splitting into single rows"
                    );
                    for (payload, event) in group {
                        match logs::insert_single(pool, &event).await {
                            Ok(_) => {
                                flushed += 1;
                                persisted.push(event);
                            }
                            Err(err) if err.is_integrity() => {
                                dead.push(DeadLetter {
                                    project_id: Some(project_id),
                                    payload,
                                    reason: format!("integrity: {err}"),
                                });
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "Row insert failed, requeueing");
                                requeue.push(payload);
                            }
                        }
                    }
                }
            }
        }

        // 4. Error-group upserts for everything that actually persisted
        let upserts = aggregate_error_groups(project_id, &persisted);
        if !upserts.is_empty() {
            if let Err(e) = error_groups::upsert_batch(pool, &upserts).await {
                tracing::error!(project_id, error = %e, "Error group upsert failed");
            } else {
                let fingerprints: Vec<String> =
                    upserts.iter().map(|u| u.fingerprint.clone()).collect();
                if let Err(e) =
                    error_groups::backfill_sample_log_ids(pool, project_id, &fingerprints).await
                {
                    tracing::warn!(project_id, error = %e, "Sample log id backfill failed");
                }
            }
        }

        // Dead letters that cannot be recorded go back to the queue instead
        let failed = dead.len() as u64;
        if !dead.is_empty() {
            if let Err(e) = dead_letter::insert(pool, &dead).await {
                tracing::error!(project_id, error = %e, "Dead letter insert failed, requeueing");
                requeue.extend(dead.into_iter().map(|d| d.payload));
            }
        }

        if !requeue.is_empty() {
            let requeued = requeue.len();
            if let Err(e) = self.queue.push(project_id, requeue).await {
                // Both the store and the queue are failing; nothing left to
                // hold the items
                tracing::error!(
                    project_id,
                    count = requeued,
                    error = %e,
                    "Requeue failed, items lost"
                );
            } else {
                tracing::warn!(project_id, count = requeued, "Requeued unpersisted items");
            }
        }

        // 5. Throughput/latency sample
        self.record_metrics(project_id, flushed, failed, started).await;

        tracing::info!(
            worker_id = self.worker_id,
            project_id,
            popped,
            flushed,
            failed,
            flush_ms = started.elapsed().as_millis() as u64,
            "Flush complete"
        );
    }

    async fn record_metrics(&self, project_id: i64, flushed: u64, failed: u64, started: Instant) {
        let now = Utc::now();
        let queue_depth = self.queue.depth(project_id).await.unwrap_or(0);

        if let Err(e) = self
            .partitions
            .ensure_for_timestamp(INGESTION_METRICS_TABLE, now)
            .await
        {
            tracing::warn!(error = %e, "Ingestion metrics partition missing");
            return;
        }

        let metric = IngestionMetric {
            worker_id: self.worker_id,
            recorded_at: now,
            flushed: flushed as i64,
            failed: failed as i64,
            queue_depth: queue_depth as i64,
            flush_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(e) = metrics::insert_ingestion_metric(self.logs_db.pool(), &metric).await {
            tracing::warn!(error = %e, "Ingestion metric insert failed");
        }
    }
}

/// Route decoded events into their target monthly partitions, preserving
/// decode order within each group
fn group_by_partition(
    pending: Vec<(Vec<u8>, QueuedEvent)>,
) -> BTreeMap<String, Vec<(Vec<u8>, QueuedEvent)>> {
    let mut groups: BTreeMap<String, Vec<(Vec<u8>, QueuedEvent)>> = BTreeMap::new();
    for (payload, event) in pending {
        let partition = partition_for_timestamp(LOGS_TABLE, event.timestamp);
        groups.entry(partition).or_default().push((payload, event));
    }
    groups
}

/// Collapse a flushed batch into one upsert per fingerprint: summed count,
/// min/max seen, and the earliest observation's sample fields
fn aggregate_error_groups(project_id: i64, events: &[QueuedEvent]) -> Vec<ErrorGroupUpsert> {
    let mut by_fingerprint: BTreeMap<&str, ErrorGroupUpsert> = BTreeMap::new();

    for event in events {
        let Some(fingerprint) = event.error_fingerprint.as_deref() else {
            continue;
        };

        match by_fingerprint.get_mut(fingerprint) {
            Some(group) => {
                group.occurrences += 1;
                if event.timestamp < group.first_seen {
                    group.first_seen = event.timestamp;
                    group.sample_stack_trace = event.stack_trace.clone();
                }
                if event.timestamp > group.last_seen {
                    group.last_seen = event.timestamp;
                }
            }
            None => {
                by_fingerprint.insert(
                    fingerprint,
                    ErrorGroupUpsert {
                        project_id,
                        fingerprint: fingerprint.to_string(),
                        error_type: event
                            .error_type
                            .clone()
                            .unwrap_or_else(|| "UnknownError".to_string()),
                        error_message: event.error_message.clone(),
                        first_seen: event.timestamp,
                        last_seen: event.timestamp,
                        occurrences: 1,
                        sample_stack_trace: event.stack_trace.clone(),
                    },
                );
            }
        }
    }

    by_fingerprint.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::types::{Importance, LogLevel, LogType};

    fn event(timestamp: &str, fingerprint: Option<&str>) -> QueuedEvent {
        QueuedEvent {
            project_id: 7,
            timestamp: timestamp.parse().unwrap(),
            ingested_at: timestamp.parse().unwrap(),
            level: LogLevel::Error,
            log_type: LogType::Exception,
            importance: Importance::Standard,
            environment: None,
            release: None,
            message: None,
            error_type: Some("ValueError".into()),
            error_message: Some("bad".into()),
            stack_trace: Some(format!("trace@{timestamp}")),
            attributes: None,
            sdk_version: None,
            platform: Some("python".into()),
            platform_version: None,
            error_fingerprint: fingerprint.map(|s| s.to_string()),
            enqueued_at: timestamp.parse().unwrap(),
        }
    }

    #[test]
    fn test_group_by_partition_routes_by_month() {
        let pending = vec![
            (vec![1], event("2025-10-31T23:59:59Z", None)),
            (vec![2], event("2025-11-01T00:00:00Z", None)),
            (vec![3], event("2025-11-14T10:00:00Z", None)),
        ];
        let groups = group_by_partition(pending);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["logs_2025_10"].len(), 1);
        assert_eq!(groups["logs_2025_11"].len(), 2);
        // Decode order preserved within the group
        assert_eq!(groups["logs_2025_11"][0].0, vec![2]);
        assert_eq!(groups["logs_2025_11"][1].0, vec![3]);
    }

    #[test]
    fn test_aggregate_error_groups_sums_and_bounds() {
        let events = vec![
            event("2025-11-14T10:00:01Z", Some("fp1")),
            event("2025-11-14T10:00:00Z", Some("fp1")),
            event("2025-11-14T10:00:02Z", Some("fp1")),
            event("2025-11-14T10:00:05Z", Some("fp2")),
            event("2025-11-14T10:00:09Z", None),
        ];

        let groups = aggregate_error_groups(7, &events);
        assert_eq!(groups.len(), 2);

        let fp1 = groups.iter().find(|g| g.fingerprint == "fp1").unwrap();
        assert_eq!(fp1.occurrences, 3);
        assert_eq!(
            fp1.first_seen,
            "2025-11-14T10:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
        );
        assert_eq!(
            fp1.last_seen,
            "2025-11-14T10:00:02Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
        );
        // Sample tracks the earliest observation
        assert_eq!(
            fp1.sample_stack_trace.as_deref(),
            Some("trace@2025-11-14T10:00:00Z")
        );

        let fp2 = groups.iter().find(|g| g.fingerprint == "fp2").unwrap();
        assert_eq!(fp2.occurrences, 1);
    }

    #[test]
    fn test_aggregate_skips_unfingerprinted_events() {
        let events = vec![event("2025-11-14T10:00:00Z", None)];
        assert!(aggregate_error_groups(7, &events).is_empty());
    }
}
