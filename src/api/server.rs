//! API server initialization
//!
//! Versioned prefix `/api/v1`. All data-plane routes sit behind the policy
//! gate middleware (credential → rate limit → quota); health is open.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use super::auth::{GateState, require_credential};
use super::middleware;
use super::routes::{health, ingest, logs, metrics, notifications};
use crate::app::CoreApp;
use crate::core::constants::{DEFAULT_BODY_LIMIT, INGEST_BODY_LIMIT};

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown; returns the CoreApp for teardown
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let gate_state = GateState {
            resolver: Arc::clone(&app.resolver),
            limiter: Arc::clone(&app.rate_limiter),
            usage: Arc::clone(&app.usage),
        };

        // Ingest carries large batches; reads stay on the small default limit
        let ingest_routes = ingest::routes(Arc::clone(&app.ingest))
            .layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT));

        let read_routes = Router::new()
            .merge(logs::routes(Arc::clone(&app.query)))
            .merge(metrics::routes(Arc::clone(&app.query)))
            .merge(notifications::routes(
                Arc::clone(&app.topics),
                shutdown.subscribe(),
            ))
            .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT));

        let data_routes = Router::new()
            .merge(ingest_routes)
            .merge(read_routes)
            .layer(axum::middleware::from_fn_with_state(
                gate_state,
                require_credential,
            ));

        let router = Router::new()
            .merge(health::routes(
                Arc::clone(&app.cache),
                Arc::clone(&app.queue),
            ))
            .merge(data_routes);

        let router = Router::new()
            .nest("/api/v1", router)
            .fallback(middleware::handle_404)
            .layer(CompressionLayer::new())
            .layer(axum::middleware::from_fn(middleware::request_deadline));

        tracing::info!(%addr, "API server listening");

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
