//! Ingestion endpoints
//!
//! `202` when any event was accepted (partial success is normal for
//! batches), `400` when every event failed validation, `503` with
//! `Retry-After` when backpressure trips.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::auth::AuthContext;
use crate::api::types::ApiError;
use crate::core::constants::MAX_BATCH_EVENTS;
use crate::domain::ingest::{IngestReport, IngestService};

#[derive(Clone)]
pub struct IngestApiState {
    pub ingest: Arc<IngestService>,
}

pub fn routes(ingest: Arc<IngestService>) -> Router<()> {
    Router::new()
        .route("/ingest/single", post(ingest_single))
        .route("/ingest/batch", post(ingest_batch))
        .route("/queue/depth", get(queue_depth))
        .with_state(IngestApiState { ingest })
}

async fn ingest_single(
    State(state): State<IngestApiState>,
    auth: AuthContext,
    Json(raw): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    let report = state.ingest.ingest(auth.project_id, &[raw]).await?;
    respond(report)
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    logs: Vec<serde_json::Value>,
}

async fn ingest_batch(
    State(state): State<IngestApiState>,
    auth: AuthContext,
    Json(batch): Json<BatchRequest>,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    if batch.logs.is_empty() {
        return Err(ApiError::bad_request("Batch must contain at least one log entry"));
    }
    if batch.logs.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::bad_request(format!(
            "Batch cannot exceed {MAX_BATCH_EVENTS} log entries"
        )));
    }

    let report = state.ingest.ingest(auth.project_id, &batch.logs).await?;
    respond(report)
}

async fn queue_depth(
    State(state): State<IngestApiState>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let depth = state.ingest.queue_depth(auth.project_id).await?;
    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "queue_depth": depth,
    })))
}

fn respond(report: IngestReport) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    if report.accepted == 0 && report.rejected > 0 {
        let detail = report
            .errors
            .as_deref()
            .map(|errors| errors.join("; "))
            .unwrap_or_else(|| "All events failed validation".to_string());
        return Err(ApiError::bad_request(detail));
    }
    Ok((StatusCode::ACCEPTED, Json(report)))
}
