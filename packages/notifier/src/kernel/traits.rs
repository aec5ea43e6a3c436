// Collaborator contracts for the dispatcher.
//
// Infrastructure only: the routing and delivery decisions live in
// `dispatch` and `handler`, which depend on these traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fspiop::{EndpointType, HttpMethod};
use serde_json::Value;

use crate::error::NotifierError;
use crate::span::TraceSpan;

// =============================================================================
// Endpoint Lookup
// =============================================================================

#[async_trait]
pub trait EndpointLookup: Send + Sync {
    /// Resolve the callback URL an FSP registered for `endpoint_type`.
    async fn get_endpoint(
        &self,
        fsp: &str,
        endpoint_type: EndpointType,
        transfer_id: &str,
        span: &TraceSpan,
    ) -> Result<String, NotifierError>;
}

// =============================================================================
// Callback Transport
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
}

#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Send a callback. Anything but a 2xx answer is a delivery failure.
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryReceipt, NotifierError>;
}

// =============================================================================
// Event Producer
// =============================================================================

#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Publish an internal event to a topic.
    async fn produce(&self, topic: &str, message: &Value) -> Result<(), NotifierError>;
}
