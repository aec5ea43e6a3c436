//! Health and metrics side channel.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use notifier_core::metrics::Metrics;
use notifier_core::server::{build_app, AppState};
use serde_json::Value;
use tower::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_reports_service_state() {
    let metrics = Arc::new(Metrics::new(true).unwrap());
    let app = build_app(AppState::new("topic-notification-event", None, metrics));

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["topic"], "topic-notification-event");
    assert_eq!(health["broker"]["status"], "not_configured");
    assert!(health["broker"].get("error").is_none());
    assert!(health["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn metrics_exposes_recorded_observations() {
    let metrics = Arc::new(Metrics::new(true).unwrap());
    metrics.record_process(true, "prepare", 0.02);
    let app = build_app(AppState::new("topic-notification-event", None, metrics));

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("notification_event_process_msg_bucket"));
    assert!(body.contains("action=\"prepare\""));
}

#[tokio::test]
async fn metrics_route_is_absent_when_disabled() {
    let metrics = Arc::new(Metrics::new(false).unwrap());
    let app = build_app(AppState::new("topic-notification-event", None, metrics));

    let (status, _) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
