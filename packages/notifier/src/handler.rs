//! Top-level message handling.
//!
//! [`consume_message`] is the only place that commits offsets and records
//! per-message metrics. Every message gets one span, one processing attempt
//! and one commit decision, whatever the outcome.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, Instrument};

use crate::commit::CommitCoordinator;
use crate::dispatch;
use crate::envelope::{decode_envelope, prepare_notification, LogMessage};
use crate::error::{normalize, NormalizedError, NotifierError};
use crate::kernel::NotifierDeps;
use crate::router::{route, Action, ProcessingState, Route, Status};
use crate::span::{AuditAction, SpanStatus, TraceSpan, NOTIFICATION_SPAN, T_API_FULFIL, T_API_PREPARE};

/// Everything message processing needs, passed by reference.
#[derive(Clone)]
pub struct DispatcherContext {
    pub deps: NotifierDeps,
    pub commit: CommitCoordinator,
}

impl DispatcherContext {
    pub fn new(deps: NotifierDeps, commit: CommitCoordinator) -> Self {
        Self { deps, commit }
    }
}

/// Progress of one message, kept for bookkeeping after processing.
#[derive(Debug)]
pub struct ProcessingRecord {
    pub state: ProcessingState,
    /// Lower-cased event action once the envelope is decoded.
    pub action: Option<String>,
}

impl ProcessingRecord {
    fn new() -> Self {
        Self {
            state: ProcessingState::Received,
            action: None,
        }
    }

    fn action_label(&self) -> &str {
        self.action.as_deref().unwrap_or("unknown")
    }
}

/// Handle one consumed batch.
///
/// A failure reading the batch is returned. Per-message failures are
/// contained: the remaining messages are still processed and the combined
/// result is `false`.
pub async fn consume_message(
    ctx: &DispatcherContext,
    batch: Result<Vec<LogMessage>, NotifierError>,
) -> Result<bool, NotifierError> {
    let started = Instant::now();
    let metrics = &ctx.deps.metrics;

    let messages = match batch {
        Ok(messages) => messages,
        Err(e) => {
            let normalized = normalize(&e);
            error!(code = normalized.code, cause = %normalized.deepest_cause, "failed to consume batch: {}", normalized);
            metrics.record_event(false, normalized.root_kind.label(), started.elapsed().as_secs_f64());
            return Err(e);
        }
    };

    let mut combined = true;
    let mut last_error: Option<NormalizedError> = None;
    for message in &messages {
        if let Err(normalized) = handle_message(ctx, message).await {
            combined = false;
            last_error = Some(normalized);
        }
    }

    let error_label = last_error.as_ref().map(|e| e.root_kind.label()).unwrap_or("");
    metrics.record_event(combined, error_label, started.elapsed().as_secs_f64());
    Ok(combined)
}

/// Process, commit, finish the span and record metrics for one message.
async fn handle_message(ctx: &DispatcherContext, message: &LogMessage) -> Result<(), NormalizedError> {
    let started = Instant::now();
    let mut span = ctx.deps.correlator.child_from_message(NOTIFICATION_SPAN, message);
    let tracing_span = span.tracing_span().clone();
    // Inbound checkpoints; the fulfil path stamps its own t_api_fulfil.
    let (prepare_ms, fulfil_ms) = (span.checkpoint(T_API_PREPARE), span.checkpoint(T_API_FULFIL));

    match &message.value {
        Some(value) => span.audit(value, AuditAction::Start),
        None => span.audit(
            &json!({ "raw": String::from_utf8_lossy(&message.payload) }),
            AuditAction::Start,
        ),
    }

    let mut record = ProcessingRecord::new();
    let result = process_message(ctx, message, &mut span, &mut record)
        .instrument(tracing_span)
        .await;

    ctx.commit.acknowledge(message).await;
    record.state.advance(ProcessingState::Committed);

    let metrics = &ctx.deps.metrics;
    let seconds = started.elapsed().as_secs_f64();
    let now_ms = Utc::now().timestamp_millis();

    match result {
        Ok(route) => {
            debug!(topic = %message.topic, offset = message.offset, route = route.label(), "message processed");
            metrics.record_process(true, record.action_label(), seconds);
            metrics.record_transaction(prepare_ms, fulfil_ms, now_ms, true);
            span.finish(SpanStatus::Success);
            Ok(())
        }
        Err(e) => {
            let normalized = normalize(&e);
            error!(
                topic = %message.topic,
                offset = message.offset,
                kind = %normalized.kind,
                root_kind = %normalized.root_kind,
                code = normalized.code,
                cause = %normalized.deepest_cause,
                "error processing notification message: {}",
                normalized
            );
            span.error(&normalized);
            metrics.record_process(false, record.action_label(), seconds);
            metrics.record_transaction(prepare_ms, fulfil_ms, now_ms, false);
            span.finish(SpanStatus::failed(&normalized));
            Err(normalized)
        }
    }
}

/// Validate, route and deliver one message. No commit, no metrics.
pub async fn process_message(
    ctx: &DispatcherContext,
    message: &LogMessage,
    span: &mut TraceSpan,
    record: &mut ProcessingRecord,
) -> Result<Route, NotifierError> {
    let deps = &ctx.deps;

    let envelope = decode_envelope(message)?;
    let action = Action::parse(&envelope.metadata.event.action);
    let status = Status::parse(&envelope.metadata.event.state.status);
    record.action = Some(action.as_str().to_ascii_lowercase());

    let notification = prepare_notification(envelope)?;
    span.set_tag("transactionId", notification.transfer_id.clone());
    record.state.advance(ProcessingState::Validated);

    info!(
        cid = %notification.transfer_id,
        action = %action,
        status = %status,
        source = %notification.from(),
        dest = %notification.to(),
        "processing notification"
    );
    if deps.settings.log_payloads {
        debug!(payload = %notification.callback_payload, headers = ?notification.headers(), "notification content");
    }

    let route = route(&action, &status);
    record.state.advance(ProcessingState::Routed);

    match &route {
        Route::ForwardCallback(delivery) => {
            dispatch::forward_callback(deps, &notification, delivery, &action, span).await?;
            record.state.advance(ProcessingState::Delivered);
        }
        Route::FulfilReemission(delivery) => {
            dispatch::reemit_fulfilment(deps, &notification, delivery, &action, span).await?;
            record.state.advance(ProcessingState::Delivered);
        }
        Route::Unhandled { action, status } => {
            debug!(action = %action, status = %status, cid = %notification.transfer_id, "no delivery for action/status");
            record.state.advance(ProcessingState::Skipped);
        }
    }

    Ok(route)
}
