//! Delivery of routed notifications.
//!
//! Two paths:
//! - [`forward_callback`] sends the callback payload to the destination FSP
//! - [`reemit_fulfilment`] synthesizes a COMMITTED fulfilment for the transfer
//!   and hands it to [`fulfil_transfer`] with the current span, which
//!   produces the fulfil event to the log

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use fspiop::{
    create_callback_headers, encode_payload, CallbackHeaderParams, CallbackHeaders,
    TRANSFERS_CONTENT_TYPE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::envelope::{Content, Event, EventState, Metadata, Notification, NotificationEnvelope};
use crate::error::{normalize, NotifierError};
use crate::kernel::{DeliveryReceipt, NotifierDeps, OutboundRequest};
use crate::router::{Action, Delivery};
use crate::span::{AuditAction, TraceSpan, T_API_FULFIL};

pub const TRANSFER_STATE_COMMITTED: &str = "COMMITTED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfilPayload {
    pub fulfilment: String,
    pub completed_timestamp: String,
    pub transfer_state: String,
}

impl FulfilPayload {
    pub fn committed(fulfilment: &str, now: DateTime<Utc>) -> Self {
        Self {
            fulfilment: fulfilment.to_string(),
            completed_timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            transfer_state: TRANSFER_STATE_COMMITTED.to_string(),
        }
    }
}

fn sign_headers(
    deps: &NotifierDeps,
    notification: &Notification,
    delivery: &Delivery,
) -> Result<CallbackHeaders, NotifierError> {
    let params = CallbackHeaderParams {
        dfsp_id: notification.to(),
        counterparty: notification.from(),
        transfer_id: &notification.transfer_id,
        headers: notification.headers(),
        http_method: delivery.method,
        endpoint_template: delivery.template,
    };
    Ok(create_callback_headers(&params, deps.signer.as_ref(), Utc::now())?)
}

/// Resolve the destination's endpoint and send the callback.
pub async fn forward_callback(
    deps: &NotifierDeps,
    notification: &Notification,
    delivery: &Delivery,
    action: &Action,
    span: &TraceSpan,
) -> Result<DeliveryReceipt, NotifierError> {
    let (from, to, id) = (notification.from(), notification.to(), &notification.transfer_id);
    let url = deps
        .endpoints
        .get_endpoint(to, delivery.endpoint_type, id, span)
        .await?;

    info!(cid = %id, fsp = %from, source = %from, dest = %to, "forward callback start");
    let started = Instant::now();

    let result = async {
        let headers = sign_headers(deps, notification, delivery)?;
        if deps.settings.log_payloads {
            debug!(url = %url, method = %delivery.method, body = %notification.callback_payload, "callback request");
        }
        deps.transport
            .send(OutboundRequest {
                url: url.clone(),
                method: delivery.method,
                headers: headers.into_map(),
                body: notification.callback_payload.clone(),
                source: to.to_string(),
                destination: from.to_string(),
            })
            .await
    }
    .await;

    let status = match &result {
        Ok(receipt) => receipt.status.to_string(),
        Err(_) => "unknown".to_string(),
    };
    deps.metrics.record_delivery(
        result.is_ok(),
        from,
        to,
        action.as_str(),
        &status,
        started.elapsed().as_secs_f64(),
    );
    info!(cid = %id, fsp = %from, source = %from, dest = %to, status = %status, "forward callback end");
    result
}

/// A fulfilment ready to be produced.
#[derive(Debug, Clone)]
pub struct FulfilRequest {
    pub transfer_id: String,
    /// Payee; signs the fulfilment.
    pub source: String,
    /// Payer.
    pub destination: String,
    pub headers: BTreeMap<String, String>,
    pub payload: FulfilPayload,
}

/// Build and produce the fulfilment for a committed transfer.
pub async fn reemit_fulfilment(
    deps: &NotifierDeps,
    notification: &Notification,
    delivery: &Delivery,
    action: &Action,
    span: &mut TraceSpan,
) -> Result<(), NotifierError> {
    let (from, to, id) = (notification.from(), notification.to(), &notification.transfer_id);
    let url = deps
        .endpoints
        .get_endpoint(to, delivery.endpoint_type, id, span)
        .await?;
    debug!(cid = %id, url = %url, "fulfilment destination resolved");

    info!(cid = %id, fsp = %from, source = %from, dest = %to, "fulfil re-emission start");
    let started = Instant::now();

    let result = match sign_headers(deps, notification, delivery) {
        Ok(headers) => {
            let request = FulfilRequest {
                transfer_id: id.clone(),
                source: to.to_string(),
                destination: from.to_string(),
                headers: headers.into_map(),
                payload: FulfilPayload::committed(&deps.settings.fulfilment, Utc::now()),
            };
            fulfil_transfer(deps, &request, span).await
        }
        Err(e) => Err(e),
    };

    deps.metrics.record_delivery(
        result.is_ok(),
        from,
        to,
        action.as_str(),
        if result.is_ok() { "produced" } else { "unknown" },
        started.elapsed().as_secs_f64(),
    );
    info!(cid = %id, fsp = %from, source = %from, dest = %to, success = result.is_ok(), "fulfil re-emission end");
    result
}

/// Stamp the span, audit, and produce the fulfil event.
pub async fn fulfil_transfer(
    deps: &NotifierDeps,
    request: &FulfilRequest,
    span: &mut TraceSpan,
) -> Result<(), NotifierError> {
    let started = Instant::now();
    span.set_tracestate_tags([(T_API_FULFIL, Utc::now().timestamp_millis().to_string())]);

    let result = async {
        span.set_tags(transfer_span_tags(request));

        let body = serde_json::to_vec(&request.payload)
            .map_err(|e| NotifierError::internal_from("failed to serialize fulfilment", e))?;
        let data_uri = encode_payload(&body, TRANSFERS_CONTENT_TYPE);

        if deps.settings.log_payloads {
            debug!(payload = ?request.payload, headers = ?request.headers, "fulfil transfer");
        }
        span.audit(
            &json!({
                "headers": request.headers,
                "dataUri": data_uri,
                "payload": request.payload,
                "params": { "id": request.transfer_id },
            }),
            AuditAction::Start,
        );

        let event = fulfil_event(request, Value::String(data_uri), span.inject(), Utc::now());
        let event = serde_json::to_value(&event)
            .map_err(|e| NotifierError::internal_from("failed to serialize fulfil event", e))?;
        deps.producer
            .produce(&deps.settings.fulfil_topic, &event)
            .await
    }
    .await;

    let seconds = started.elapsed().as_secs_f64();
    match result {
        Ok(()) => {
            deps.metrics.record_transfer_fulfil(true, seconds);
            Ok(())
        }
        Err(e) => {
            let normalized = normalize(&e);
            error!(
                cid = %request.transfer_id,
                code = normalized.code,
                cause = %normalized.deepest_cause,
                "fulfil transfer failed: {}",
                normalized
            );
            deps.metrics.record_transfer_fulfil(false, seconds);
            Err(e)
        }
    }
}

fn transfer_span_tags(request: &FulfilRequest) -> [(&'static str, String); 6] {
    [
        ("transactionType", "transfer".to_string()),
        ("transactionAction", "fulfil".to_string()),
        ("transactionId", request.transfer_id.clone()),
        ("source", request.source.clone()),
        ("destination", request.destination.clone()),
        ("payeeFsp", request.source.clone()),
    ]
}

/// The internal fulfil event for a transfer.
pub fn fulfil_event(
    request: &FulfilRequest,
    payload: Value,
    trace: Value,
    now: DateTime<Utc>,
) -> NotificationEnvelope {
    NotificationEnvelope {
        id: Some(Uuid::new_v4().to_string()),
        from: request.source.clone(),
        to: request.destination.clone(),
        message_type: Some("application/json".to_string()),
        content: Content {
            headers: request.headers.clone(),
            payload,
            uri_params: Some(BTreeMap::from([(
                "id".to_string(),
                Value::String(request.transfer_id.clone()),
            )])),
        },
        metadata: Metadata {
            event: Event {
                id: Some(Uuid::new_v4().to_string()),
                event_type: Some("fulfil".to_string()),
                action: "commit".to_string(),
                created_at: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
                state: EventState {
                    status: "success".to_string(),
                    code: Some(json!(0)),
                    description: Some("action successful".to_string()),
                },
            },
            trace: Some(trace),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode_envelope, prepare_notification, LogMessage};
    use crate::kernel::test_dependencies::{
        MockEndpointLookup, RecordingProducer, TestDependencies, TEST_FULFILMENT, TEST_FULFIL_TOPIC,
    };
    use crate::router::{route, Route, Status};
    use crate::span::NOTIFICATION_SPAN;
    use chrono::TimeZone;
    use fspiop::{decode_payload, EndpointType};

    fn commit_notification() -> Notification {
        let value = json!({
            "from": "dfspA",
            "to": "dfspB",
            "content": {
                "headers": { "fspiop-source": "dfspA", "fspiop-destination": "dfspB" },
                "payload": { "completedTimestamp": "2026-10-14T09:30:00.000Z" },
                "uriParams": { "id": "t-commit-1" }
            },
            "metadata": { "event": { "action": "commit", "state": { "status": "success" } } }
        });
        let msg = LogMessage::from_value("t", 1, value);
        prepare_notification(decode_envelope(&msg).unwrap()).unwrap()
    }

    fn commit_delivery() -> Delivery {
        match route(&Action::Commit, &Status::Success) {
            Route::FulfilReemission(d) => d,
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn test_fulfil_payload_shape() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let payload = FulfilPayload::committed("f", now);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["transferState"], "COMMITTED");
        assert_eq!(value["completedTimestamp"], "2026-10-14T09:30:00.000Z");
        assert_eq!(value["fulfilment"], "f");
    }

    #[tokio::test]
    async fn test_reemit_produces_committed_fulfil_event() {
        let test = TestDependencies::new().endpoints(MockEndpointLookup::new().with_endpoint(
            "dfspB",
            EndpointType::TransferPut,
            "http://dfspb.local/transfers/{{transferId}}",
        ));
        let deps = test.into_deps();
        let mut span = deps.correlator.start_span(NOTIFICATION_SPAN, None);

        reemit_fulfilment(&deps, &commit_notification(), &commit_delivery(), &Action::Commit, &mut span)
            .await
            .unwrap();

        let produced = test.producer.produced();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].topic, TEST_FULFIL_TOPIC);

        let event = &produced[0].message;
        assert_eq!(event["metadata"]["event"]["type"], "fulfil");
        assert_eq!(event["metadata"]["event"]["action"], "commit");
        assert_eq!(event["content"]["uriParams"]["id"], "t-commit-1");
        assert_eq!(event["from"], "dfspB");
        assert_eq!(event["to"], "dfspA");
        assert_eq!(event["content"]["headers"]["fspiop-uri"], "/transfers/t-commit-1");
        assert_eq!(event["metadata"]["trace"]["traceId"], span.trace_id());

        let decoded = decode_payload(&event["content"]["payload"]).unwrap();
        let body: FulfilPayload = serde_json::from_slice(&decoded.body).unwrap();
        assert_eq!(body.transfer_state, TRANSFER_STATE_COMMITTED);
        assert_eq!(body.fulfilment, TEST_FULFILMENT);

        assert!(span.checkpoint(T_API_FULFIL).is_some());
        assert_eq!(span.tag("transactionId"), Some("t-commit-1"));
        assert_eq!(test.metrics.sample_count("transfer_fulfil"), 1);
        span.finish(crate::span::SpanStatus::Success);
    }

    #[tokio::test]
    async fn test_fulfil_failure_is_reraised_and_timed() {
        let test = TestDependencies::new()
            .endpoints(MockEndpointLookup::new().with_endpoint(
                "dfspB",
                EndpointType::TransferPut,
                "http://dfspb.local/transfers/{{transferId}}",
            ))
            .producer(RecordingProducer::failing());
        let deps = test.into_deps();
        let mut span = deps.correlator.start_span(NOTIFICATION_SPAN, None);

        let err = reemit_fulfilment(&deps, &commit_notification(), &commit_delivery(), &Action::Commit, &mut span)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Delivery);

        let text = test.metrics.gather();
        assert!(text.contains("transfer_fulfil_count{success=\"false\"} 1"));
        span.finish(crate::span::SpanStatus::Success);
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_production() {
        let test = TestDependencies::new();
        let deps = test.into_deps();
        let mut span = deps.correlator.start_span(NOTIFICATION_SPAN, None);

        let err = reemit_fulfilment(&deps, &commit_notification(), &commit_delivery(), &Action::Commit, &mut span)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Lookup);
        assert!(test.producer.produced().is_empty());
        span.finish(crate::span::SpanStatus::Success);
    }
}
