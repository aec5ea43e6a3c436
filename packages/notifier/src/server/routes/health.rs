use async_nats::connection::State;
use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub topic: String,
    pub broker: BrokerHealth,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check endpoint
///
/// Returns 200 OK while the broker connection is up (or not configured),
/// 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let broker = match &state.broker {
        None => BrokerHealth {
            status: "not_configured".to_string(),
            error: None,
        },
        Some(client) => match client.connection_state() {
            State::Connected => BrokerHealth {
                status: "ok".to_string(),
                error: None,
            },
            other => BrokerHealth {
                status: "error".to_string(),
                error: Some(format!("connection {:?}", other)),
            },
        },
    };

    let healthy = broker.status != "error";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            version: state.version.to_string(),
            topic: state.topic.clone(),
            broker,
        }),
    )
}
