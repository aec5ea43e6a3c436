//! Side-channel HTTP server setup.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{extract::Extension, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::Metrics;
use crate::server::routes::{health_handler, metrics_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub started_at: Instant,
    pub version: &'static str,
    pub topic: String,
    pub broker: Option<async_nats::Client>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(topic: impl Into<String>, broker: Option<async_nats::Client>, metrics: Arc<Metrics>) -> Self {
        Self {
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            topic: topic.into(),
            broker,
            metrics,
        }
    }
}

/// Build the router. `/metrics` is only mounted when metrics are enabled.
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));
    if state.metrics.enabled() {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Bind the side-channel listener.
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind health server on {}", address))?;
    info!(address = %address, "health server listening");
    Ok(listener)
}

/// Serve until `shutdown` flips.
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("health server failed")
}
