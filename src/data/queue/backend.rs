//! Queue backend trait definition
//!
//! Per-project FIFO queues holding serialized log events between the ingest
//! front and the storage workers. Delivery is at-least-once: a popped item
//! that cannot be persisted is pushed back, and duplicates are tolerated
//! downstream.

use std::time::Duration;

use async_trait::async_trait;

use super::error::QueueError;

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append payloads to the project's queue (FIFO order preserved)
    async fn push(&self, project_id: i64, payloads: Vec<Vec<u8>>) -> Result<(), QueueError>;

    /// Pop up to `max` payloads from the head of the project's queue.
    /// Returns fewer (possibly zero) items when the queue runs dry.
    async fn pop_batch(&self, project_id: i64, max: usize) -> Result<Vec<Vec<u8>>, QueueError>;

    /// Current number of queued payloads for the project
    async fn depth(&self, project_id: i64) -> Result<u64, QueueError>;

    /// Projects with a non-empty queue
    async fn active_projects(&self) -> Result<Vec<i64>, QueueError>;

    /// Block until new items may be available or the timeout elapses.
    /// Workers use this instead of tight polling; spurious wakeups are fine.
    async fn wait_for_items(&self, timeout: Duration);

    async fn health_check(&self) -> Result<(), QueueError>;

    fn backend_name(&self) -> &'static str;
}
