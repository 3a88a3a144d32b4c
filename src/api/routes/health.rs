//! Health endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router, routing::get};

use crate::data::cache::CacheService;
use crate::data::queue::QueueService;

#[derive(Clone)]
pub struct HealthApiState {
    pub cache: Arc<CacheService>,
    pub queue: Arc<QueueService>,
}

pub fn routes(cache: Arc<CacheService>, queue: Arc<QueueService>) -> Router<()> {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthApiState { cache, queue })
}

async fn health(State(state): State<HealthApiState>) -> Json<serde_json::Value> {
    let cache_ok = state.cache.health_check().await.is_ok();
    let queue_ok = state.queue.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if cache_ok && queue_ok { "ok" } else { "degraded" },
        "cache": state.cache.backend_name(),
        "queue": state.queue.backend_name(),
    }))
}
