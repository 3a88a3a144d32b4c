//! Per-project log queues
//!
//! The handoff between the ingest front (sole producer) and the storage
//! workers (sole consumers). Backend selection follows the cache backend:
//! memory for single-process deployments, Redis for durability and
//! multi-process workers.

mod backend;
mod error;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

pub use backend::QueueBackend;
pub use error::QueueError;
pub use memory::MemoryQueueBackend;

use crate::core::config::{CacheBackendType, CacheConfig};

pub struct QueueService {
    backend: Arc<dyn QueueBackend>,
}

impl QueueService {
    pub async fn from_cache_config(config: &CacheConfig) -> Result<Self, QueueError> {
        let backend: Arc<dyn QueueBackend> = match config.backend {
            CacheBackendType::Memory => Arc::new(MemoryQueueBackend::new()),
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    QueueError::Config("redis_url required for Redis backend".into())
                })?;
                Arc::new(redis::RedisQueueBackend::new(url).await?)
            }
        };
        Ok(Self { backend })
    }

    /// Memory-backed service for tests and single-process defaults
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryQueueBackend::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub async fn push(&self, project_id: i64, payloads: Vec<Vec<u8>>) -> Result<(), QueueError> {
        self.backend.push(project_id, payloads).await
    }

    pub async fn pop_batch(
        &self,
        project_id: i64,
        max: usize,
    ) -> Result<Vec<Vec<u8>>, QueueError> {
        self.backend.pop_batch(project_id, max).await
    }

    pub async fn depth(&self, project_id: i64) -> Result<u64, QueueError> {
        self.backend.depth(project_id).await
    }

    pub async fn active_projects(&self) -> Result<Vec<i64>, QueueError> {
        self.backend.active_projects().await
    }

    pub async fn wait_for_items(&self, timeout: Duration) {
        self.backend.wait_for_items(timeout).await
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.backend.health_check().await
    }
}
