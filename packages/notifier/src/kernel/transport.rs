//! HTTP delivery of FSP callbacks.

use std::time::Duration;

use async_trait::async_trait;
use fspiop::HttpMethod;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::NotifierError;
use crate::kernel::{CallbackTransport, DeliveryReceipt, OutboundRequest};

pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    pub fn new(timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::internal_from("failed to build callback client", e))?;
        Ok(Self { client })
    }
}

fn header_map(request: &OutboundRequest) -> Result<HeaderMap, NotifierError> {
    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NotifierError::delivery_from(format!("invalid header name {}", name), e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NotifierError::delivery_from(format!("invalid value for header {}", name), e))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryReceipt, NotifierError> {
        let headers = header_map(&request)?;
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
        };

        debug!(
            method = %request.method,
            url = %request.url,
            source = %request.source,
            destination = %request.destination,
            "sending callback"
        );

        let response = builder
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| NotifierError::delivery_from(format!("callback to {} failed", request.url), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %request.url, status = %status, body = %body, "callback rejected");
            return Err(NotifierError::delivery(format!(
                "callback to {} answered {}",
                request.url, status
            )));
        }

        Ok(DeliveryReceipt {
            status: status.as_u16(),
        })
    }
}
