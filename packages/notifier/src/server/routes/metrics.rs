use axum::{extract::Extension, http::header, response::IntoResponse};

use crate::server::app::AppState;

/// Prometheus text exposition
pub async fn metrics_handler(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.gather(),
    )
}
