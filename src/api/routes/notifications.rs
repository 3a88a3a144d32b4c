//! SSE endpoint for real-time error notifications
//!
//! One broadcast subscription per project channel per process (the bridge in
//! `data::topics` multiplexes Redis), fanned out to per-client bounded
//! buffers. A slow client lags and loses the oldest events; it never blocks
//! the hub or other subscribers. No resume cursor: reconnection is the
//! client's job.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::stream::Stream;
use tokio::sync::watch;

use crate::api::auth::AuthContext;
use crate::api::types::ApiError;
use crate::core::constants::SSE_KEEPALIVE_SECS;
use crate::data::topics::{TopicError, TopicService};
use crate::domain::notify::{ErrorNotification, channel_name};

#[derive(Clone)]
pub struct NotificationsApiState {
    pub topics: Arc<TopicService>,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub fn routes(topics: Arc<TopicService>, shutdown_rx: watch::Receiver<bool>) -> Router<()> {
    Router::new()
        .route("/notifications/stream", get(stream))
        .with_state(NotificationsApiState {
            topics,
            shutdown_rx,
        })
}

async fn stream(
    State(state): State<NotificationsApiState>,
    auth: AuthContext,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let project_id = auth.project_id;
    let topic = state
        .topics
        .broadcast_topic::<ErrorNotification>(&channel_name(project_id));
    let subscriber_result = topic.subscribe().await;
    let mut shutdown_rx = state.shutdown_rx.clone();

    let stream = async_stream::stream! {
        let mut subscriber = match subscriber_result {
            Ok(subscriber) => subscriber,
            Err(e) => {
                tracing::error!(project_id, error = %e, "Failed to subscribe to notification channel");
                yield Ok(Event::default().event("error").data("subscription failed"));
                return;
            }
        };

        yield Ok(Event::default().event("connected").data(
            serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "project_id": project_id,
            })
            .to_string(),
        ));

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        // Tell the client to reconnect elsewhere before closing
                        yield Ok(Event::default().event("terminate").data("shutdown"));
                        break;
                    }
                }
                result = subscriber.recv() => {
                    match result {
                        Ok(notification) => {
                            match serde_json::to_string(&notification) {
                                Ok(data) => {
                                    yield Ok(Event::default()
                                        .event("error_notification")
                                        .data(data));
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "Failed to serialize notification");
                                }
                            }
                        }
                        Err(TopicError::Lagged(n)) => {
                            // Slow client: dropped the oldest n events, keep going
                            tracing::warn!(project_id, lagged = n, "SSE subscriber lagged");
                        }
                        Err(TopicError::ChannelClosed) => break,
                        Err(e) => {
                            tracing::error!(project_id, error = %e, "Notification stream error");
                            break;
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    ))
}
