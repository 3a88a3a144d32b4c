//! In-memory queue backend
//!
//! Per-project `VecDeque`s behind one lock, with a `Notify` so idle workers
//! wake immediately on push. Suitable for single-process deployments and
//! tests; a crash loses queued items (use the Redis backend for durability).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::backend::QueueBackend;
use super::error::QueueError;

pub struct MemoryQueueBackend {
    queues: Mutex<HashMap<i64, VecDeque<Vec<u8>>>>,
    notify: Arc<Notify>,
}

impl Default for MemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn push(&self, project_id: i64, payloads: Vec<Vec<u8>>) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }
        {
            let mut queues = self.queues.lock();
            let queue = queues.entry(project_id).or_default();
            for payload in payloads {
                queue.push_back(payload);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_batch(&self, project_id: i64, max: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&project_id) else {
            return Ok(Vec::new());
        };
        let take = max.min(queue.len());
        let batch = queue.drain(..take).collect();
        if queue.is_empty() {
            queues.remove(&project_id);
        }
        Ok(batch)
    }

    async fn depth(&self, project_id: i64) -> Result<u64, QueueError> {
        Ok(self
            .queues
            .lock()
            .get(&project_id)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }

    async fn active_projects(&self) -> Result<Vec<i64>, QueueError> {
        Ok(self
            .queues
            .lock()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn wait_for_items(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let backend = MemoryQueueBackend::new();
        backend
            .push(1, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();

        let batch = backend.pop_batch(1, 2).await.unwrap();
        assert_eq!(batch, vec![b"a".to_vec(), b"b".to_vec()]);

        let rest = backend.pop_batch(1, 10).await.unwrap();
        assert_eq!(rest, vec![b"c".to_vec()]);
        assert!(backend.pop_batch(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_depth_tracks_pushes_and_pops() {
        let backend = MemoryQueueBackend::new();
        assert_eq!(backend.depth(1).await.unwrap(), 0);

        backend.push(1, vec![b"x".to_vec(); 5]).await.unwrap();
        assert_eq!(backend.depth(1).await.unwrap(), 5);

        backend.pop_batch(1, 3).await.unwrap();
        assert_eq!(backend.depth(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let backend = MemoryQueueBackend::new();
        backend.push(1, vec![b"a".to_vec()]).await.unwrap();
        backend.push(2, vec![b"b".to_vec()]).await.unwrap();

        let mut active = backend.active_projects().await.unwrap();
        active.sort();
        assert_eq!(active, vec![1, 2]);

        assert_eq!(backend.pop_batch(1, 10).await.unwrap().len(), 1);
        assert_eq!(backend.depth(2).await.unwrap(), 1);
        assert_eq!(backend.active_projects().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_wait_for_items_wakes_on_push() {
        let backend = Arc::new(MemoryQueueBackend::new());

        let waiter = Arc::clone(&backend);
        let handle = tokio::spawn(async move {
            waiter.wait_for_items(Duration::from_secs(5)).await;
        });

        tokio::task::yield_now().await;
        backend.push(1, vec![b"x".to_vec()]).await.unwrap();

        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake promptly")
            .unwrap();
    }
}
