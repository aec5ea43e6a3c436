//! HTTP adapters against a mock switch and a mock FSP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fspiop::{EndpointType, HttpMethod};
use httpmock::prelude::*;
use notifier_core::error::ErrorKind;
use notifier_core::kernel::{
    CachedEndpointLookup, CallbackTransport, EndpointLookup, HttpCallbackTransport, OutboundRequest,
};
use notifier_core::span::{RecordingSpanExporter, SpanCorrelator, SpanStatus, TraceSpan};
use serde_json::json;

fn span() -> TraceSpan {
    SpanCorrelator::new("adapter-test", "acmevendor", Arc::new(RecordingSpanExporter::new()))
        .start_span("lookup", None)
}

fn lookup(server: &MockServer, expires_in: Duration) -> CachedEndpointLookup {
    CachedEndpointLookup::new(&server.base_url(), expires_in, Duration::from_secs(5)).unwrap()
}

fn endpoint_list() -> serde_json::Value {
    json!([
        {
            "type": "FSPIOP_CALLBACK_URL_TRANSFER_POST",
            "value": "http://dfspb.local/transfers/{{transferId}}/error"
        },
        {
            "type": "FSPIOP_CALLBACK_URL_TRANSFER_PUT",
            "value": "http://dfspb.local/{{fsp}}/transfers/{{transferId}}"
        }
    ])
}

#[tokio::test]
async fn lookup_renders_registered_endpoint() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/participants/dfspB/endpoints");
            then.status(200).json_body(endpoint_list());
        })
        .await;

    let lookup = lookup(&server, Duration::from_secs(60));
    let span = span();

    let url = lookup
        .get_endpoint("dfspB", EndpointType::TransferPost, "abc-123", &span)
        .await
        .unwrap();
    assert_eq!(url, "http://dfspb.local/transfers/abc-123/error");

    let url = lookup
        .get_endpoint("dfspB", EndpointType::TransferPut, "abc-123", &span)
        .await
        .unwrap();
    assert_eq!(url, "http://dfspb.local/dfspB/transfers/abc-123");

    mock.assert_hits_async(1).await;
    span.finish(SpanStatus::Success);
}

#[tokio::test]
async fn lookup_refetches_after_expiry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/participants/dfspB/endpoints");
            then.status(200).json_body(endpoint_list());
        })
        .await;

    let lookup = lookup(&server, Duration::ZERO);
    let span = span();
    for _ in 0..2 {
        lookup
            .get_endpoint("dfspB", EndpointType::TransferPost, "abc-123", &span)
            .await
            .unwrap();
    }

    mock.assert_hits_async(2).await;
    span.finish(SpanStatus::Success);
}

#[tokio::test]
async fn lookup_failures_are_lookup_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/participants/dfspX/endpoints");
            then.status(500);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/participants/dfspB/endpoints");
            then.status(200).json_body(json!([]));
        })
        .await;

    let lookup = lookup(&server, Duration::from_secs(60));
    let span = span();

    let err = lookup
        .get_endpoint("dfspX", EndpointType::TransferPost, "abc-123", &span)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);

    let err = lookup
        .get_endpoint("dfspB", EndpointType::TransferPut, "abc-123", &span)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    span.finish(SpanStatus::Success);
}

fn callback(url: String) -> OutboundRequest {
    OutboundRequest {
        url,
        method: HttpMethod::Put,
        headers: BTreeMap::from([
            ("fspiop-source".to_string(), "dfspB".to_string()),
            ("fspiop-destination".to_string(), "dfspA".to_string()),
        ]),
        body: r#"{"transferState":"COMMITTED"}"#.to_string(),
        source: "dfspB".to_string(),
        destination: "dfspA".to_string(),
    }
}

#[tokio::test]
async fn transport_sends_headers_and_body() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/transfers/abc-123")
                .header("fspiop-source", "dfspB")
                .header("fspiop-destination", "dfspA")
                .body(r#"{"transferState":"COMMITTED"}"#);
            then.status(200);
        })
        .await;

    let transport = HttpCallbackTransport::new(Duration::from_secs(5)).unwrap();
    let receipt = transport
        .send(callback(server.url("/transfers/abc-123")))
        .await
        .unwrap();

    assert_eq!(receipt.status, 200);
    mock.assert_async().await;
}

#[tokio::test]
async fn transport_rejects_non_success_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path("/transfers/abc-123");
            then.status(400).body("bad request");
        })
        .await;

    let transport = HttpCallbackTransport::new(Duration::from_secs(5)).unwrap();
    let err = transport
        .send(callback(server.url("/transfers/abc-123")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Delivery);
    assert!(err.to_string().contains("400"));
}
