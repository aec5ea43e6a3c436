//! Endpoint types, URI templates and HTTP methods used by transfer callbacks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content type for every transfers callback.
pub const TRANSFERS_CONTENT_TYPE: &str =
    "application/vnd.interoperability.transfers+json;version=1.0";

/// Header names.
pub mod header {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DATE: &str = "date";
    pub const FSPIOP_SOURCE: &str = "fspiop-source";
    pub const FSPIOP_DESTINATION: &str = "fspiop-destination";
    pub const FSPIOP_SIGNATURE: &str = "fspiop-signature";
    pub const FSPIOP_HTTP_METHOD: &str = "fspiop-http-method";
    pub const FSPIOP_URI: &str = "fspiop-uri";
    pub const TRACEPARENT: &str = "traceparent";
    pub const TRACESTATE: &str = "tracestate";
}

/// Callback endpoint types registered per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointType {
    #[serde(rename = "FSPIOP_CALLBACK_URL_TRANSFER_POST")]
    TransferPost,
    #[serde(rename = "FSPIOP_CALLBACK_URL_TRANSFER_PUT")]
    TransferPut,
    #[serde(rename = "FSPIOP_CALLBACK_URL_TRANSFER_ERROR")]
    TransferError,
}

impl EndpointType {
    /// Wire name used by the participant endpoint registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::TransferPost => "FSPIOP_CALLBACK_URL_TRANSFER_POST",
            EndpointType::TransferPut => "FSPIOP_CALLBACK_URL_TRANSFER_PUT",
            EndpointType::TransferError => "FSPIOP_CALLBACK_URL_TRANSFER_ERROR",
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path templates for the `fspiop-uri` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTemplate {
    /// `/transfers/{{transferId}}`
    TransfersPut,
    /// `/transfers/{{transferId}}/error`
    TransfersPutError,
}

impl EndpointTemplate {
    pub fn template(&self) -> &'static str {
        match self {
            EndpointTemplate::TransfersPut => "/transfers/{{transferId}}",
            EndpointTemplate::TransfersPutError => "/transfers/{{transferId}}/error",
        }
    }

    /// Render the template for a transfer id.
    pub fn render(&self, transfer_id: &str) -> String {
        self.template().replace("{{transferId}}", transfer_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
