//! Trace span correlation across the consume → produce hop.
//!
//! Each consumed message gets one [`TraceSpan`], a child of the context the
//! producer embedded in `metadata.trace` (or in W3C `traceparent` /
//! `tracestate` content headers). Latency checkpoints such as
//! `t_api_prepare` ride in the tracestate entry under our vendor key as
//! `key:value;key:value`.
//!
//! Spans report to a [`SpanExporter`]. `finish` consumes the span, so a span
//! is finished at most once; dropping an unfinished span exports it as
//! [`SpanStatus::Abandoned`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::envelope::LogMessage;
use crate::error::NormalizedError;

/// Name of the per-message span.
pub const NOTIFICATION_SPAN: &str = "ml_notification_event";

/// Checkpoint stamped when the prepare request entered the API.
pub const T_API_PREPARE: &str = "t_api_prepare";

/// Checkpoint stamped when the fulfil request entered the API.
pub const T_API_FULFIL: &str = "t_api_fulfil";

pub const DEFAULT_TRACESTATE_VENDOR: &str = "acmevendor";

// =============================================================================
// Span Context
// =============================================================================

/// Propagated identity of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub service: String,
    /// 32 lower-case hex chars.
    pub trace_id: String,
    /// 16 lower-case hex chars.
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
    pub tags: BTreeMap<String, String>,
}

impl SpanContext {
    /// Read a `metadata.trace` object.
    pub fn from_trace_value(trace: &Value) -> Option<Self> {
        let trace_id = trace.get("traceId")?.as_str()?.to_ascii_lowercase();
        let span_id = trace.get("spanId")?.as_str()?.to_ascii_lowercase();
        if !is_hex(&trace_id, 32) || !is_hex(&span_id, 16) {
            return None;
        }
        let sampled = match trace.get("sampled") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let tags = trace
            .get("tags")
            .and_then(Value::as_object)
            .map(|tags| {
                tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            service: trace
                .get("service")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            trace_id,
            span_id,
            parent_span_id: trace
                .get("parentSpanId")
                .and_then(Value::as_str)
                .map(str::to_string),
            sampled,
            tags,
        })
    }

    /// Read a W3C `traceparent` header, with optional `tracestate`.
    pub fn from_traceparent(traceparent: &str, tracestate: Option<&str>) -> Option<Self> {
        let mut parts = traceparent.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?.to_ascii_lowercase();
        let span_id = parts.next()?.to_ascii_lowercase();
        let flags = parts.next()?;
        if version.len() != 2 || !is_hex(&trace_id, 32) || !is_hex(&span_id, 16) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        let mut tags = BTreeMap::new();
        if let Some(state) = tracestate {
            tags.insert("tracestate".to_string(), state.to_string());
        }
        Some(Self {
            service: String::new(),
            trace_id,
            span_id,
            parent_span_id: None,
            sampled: flags & 0x01 == 0x01,
            tags,
        })
    }

    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{}",
            self.trace_id,
            self.span_id,
            if self.sampled { "01" } else { "00" }
        )
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value.chars().all(|c| c.is_ascii_hexdigit())
        && value.chars().any(|c| c != '0')
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

// =============================================================================
// Tracestate
// =============================================================================

/// Split a tracestate header into our vendor's tags and the other entries.
fn parse_tracestate(raw: &str, vendor: &str) -> (BTreeMap<String, String>, Vec<String>) {
    let mut own = BTreeMap::new();
    let mut others = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) if key.trim() == vendor => {
                for pair in value.split(';').filter(|p| !p.is_empty()) {
                    if let Some((k, v)) = pair.split_once(':') {
                        own.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
            _ => others.push(entry.to_string()),
        }
    }
    (own, others)
}

fn render_tracestate(vendor: &str, own: &BTreeMap<String, String>, others: &[String]) -> String {
    let value = own
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(";");
    std::iter::once(format!("{}={}", vendor, value))
        .chain(others.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Exporter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Start,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Start => "start",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Success,
    Failed { code: String, message: String },
    /// Dropped without `finish`.
    Abandoned,
}

impl SpanStatus {
    pub fn failed(err: &NormalizedError) -> Self {
        SpanStatus::Failed {
            code: err.code.to_string(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub trace_id: String,
    pub span_id: String,
    pub action: AuditAction,
    pub content: Value,
}

#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub context: SpanContext,
    pub tracestate: BTreeMap<String, String>,
    pub status: SpanStatus,
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Receives span lifecycle records.
pub trait SpanExporter: Send + Sync {
    fn audit(&self, record: AuditRecord);
    fn finish(&self, span: FinishedSpan);
}

/// Writes span records as structured log events.
#[derive(Debug, Default)]
pub struct LoggingSpanExporter;

impl SpanExporter for LoggingSpanExporter {
    fn audit(&self, record: AuditRecord) {
        debug!(
            target: "notifier::audit",
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            action = record.action.as_str(),
            content = %record.content,
            "audit"
        );
    }

    fn finish(&self, span: FinishedSpan) {
        let duration_ms = span.duration.as_millis() as u64;
        match &span.status {
            SpanStatus::Success => info!(
                target: "notifier::span",
                name = %span.name,
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                duration_ms,
                "span finished"
            ),
            SpanStatus::Failed { code, message } => error!(
                target: "notifier::span",
                name = %span.name,
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                duration_ms,
                code = %code,
                error = %message,
                "span failed"
            ),
            SpanStatus::Abandoned => warn!(
                target: "notifier::span",
                name = %span.name,
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                duration_ms,
                "span dropped without finish"
            ),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSpanExporter {
    audits: Mutex<Vec<AuditRecord>>,
    finished: Mutex<Vec<FinishedSpan>>,
}

impl RecordingSpanExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audits(&self) -> Vec<AuditRecord> {
        self.audits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SpanExporter for RecordingSpanExporter {
    fn audit(&self, record: AuditRecord) {
        self.audits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn finish(&self, span: FinishedSpan) {
        self.finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(span);
    }
}

// =============================================================================
// Trace Span
// =============================================================================

pub struct TraceSpan {
    name: String,
    context: SpanContext,
    vendor: String,
    tracestate: BTreeMap<String, String>,
    foreign_tracestate: Vec<String>,
    errors: Vec<String>,
    started_at: Instant,
    start_timestamp: DateTime<Utc>,
    exporter: Arc<dyn SpanExporter>,
    tracing_span: tracing::Span,
    finished: bool,
}

impl TraceSpan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn trace_id(&self) -> &str {
        &self.context.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.context.span_id
    }

    pub fn tracing_span(&self) -> &tracing::Span {
        &self.tracing_span
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.context.tags.get(key).map(String::as_str)
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.tags.insert(key.into(), value.into());
    }

    pub fn set_tags<K, V>(&mut self, tags: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in tags {
            self.set_tag(k, v);
        }
    }

    pub fn tracestate_tags(&self) -> &BTreeMap<String, String> {
        &self.tracestate
    }

    pub fn set_tracestate_tags<K, V>(&mut self, tags: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in tags {
            self.tracestate.insert(k.into(), v.into());
        }
    }

    /// A checkpoint tag parsed as unix milliseconds; zero and junk are ignored.
    pub fn checkpoint(&self, name: &str) -> Option<i64> {
        self.tracestate
            .get(name)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
    }

    pub fn audit(&self, content: &Value, action: AuditAction) {
        self.exporter.audit(AuditRecord {
            trace_id: self.context.trace_id.clone(),
            span_id: self.context.span_id.clone(),
            action,
            content: content.clone(),
        });
    }

    /// Record an error on the span without finishing it.
    pub fn error(&mut self, err: &NormalizedError) {
        self.errors.push(err.to_string());
    }

    /// Context to embed as `metadata.trace` on an outgoing message.
    pub fn inject(&self) -> Value {
        let mut tags: Map<String, Value> = self
            .context
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        tags.insert(
            "tracestate".to_string(),
            Value::String(render_tracestate(
                &self.vendor,
                &self.tracestate,
                &self.foreign_tracestate,
            )),
        );

        let mut trace = json!({
            "service": self.context.service,
            "traceId": self.context.trace_id,
            "spanId": self.context.span_id,
            "sampled": if self.context.sampled { 1 } else { 0 },
            "flags": if self.context.sampled { "01" } else { "00" },
            "startTimestamp": self.start_timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "tags": Value::Object(tags),
        });
        if let Some(parent) = &self.context.parent_span_id {
            trace["parentSpanId"] = Value::String(parent.clone());
        }
        trace
    }

    /// Finish the span and export it.
    pub fn finish(mut self, status: SpanStatus) {
        self.export(status);
    }

    fn export(&mut self, status: SpanStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.exporter.finish(FinishedSpan {
            name: self.name.clone(),
            context: self.context.clone(),
            tracestate: self.tracestate.clone(),
            status,
            errors: std::mem::take(&mut self.errors),
            duration: self.started_at.elapsed(),
        });
    }
}

impl Drop for TraceSpan {
    fn drop(&mut self) {
        self.export(SpanStatus::Abandoned);
    }
}

impl std::fmt::Debug for TraceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSpan")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("tracestate", &self.tracestate)
            .field("finished", &self.finished)
            .finish()
    }
}

// =============================================================================
// Correlator
// =============================================================================

/// Creates per-message spans.
#[derive(Clone)]
pub struct SpanCorrelator {
    service: String,
    vendor: String,
    exporter: Arc<dyn SpanExporter>,
}

impl SpanCorrelator {
    pub fn new(
        service: impl Into<String>,
        vendor: impl Into<String>,
        exporter: Arc<dyn SpanExporter>,
    ) -> Self {
        Self {
            service: service.into(),
            vendor: vendor.into(),
            exporter,
        }
    }

    /// Parent context embedded in a raw message, if any.
    pub fn extract_context(&self, message: &LogMessage) -> Option<SpanContext> {
        let value = message.value.as_ref()?;
        if let Some(ctx) = value
            .pointer("/metadata/trace")
            .and_then(SpanContext::from_trace_value)
        {
            return Some(ctx);
        }

        let headers = value.pointer("/content/headers")?.as_object()?;
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| v.as_str())
        };
        SpanContext::from_traceparent(header("traceparent")?, header("tracestate"))
    }

    /// Child span of the message's embedded context, or a fresh root.
    pub fn child_from_message(&self, name: &str, message: &LogMessage) -> TraceSpan {
        let parent = self.extract_context(message);
        self.start_span(name, parent)
    }

    pub fn start_span(&self, name: &str, parent: Option<SpanContext>) -> TraceSpan {
        let (context, tracestate, foreign) = match parent {
            Some(parent) => {
                let (own, others) = parent
                    .tags
                    .get("tracestate")
                    .map(|raw| parse_tracestate(raw, &self.vendor))
                    .unwrap_or_default();
                let mut tags = parent.tags;
                tags.remove("tracestate");
                let context = SpanContext {
                    service: self.service.clone(),
                    trace_id: parent.trace_id,
                    span_id: new_span_id(),
                    parent_span_id: Some(parent.span_id),
                    sampled: parent.sampled,
                    tags,
                };
                (context, own, others)
            }
            None => {
                let context = SpanContext {
                    service: self.service.clone(),
                    trace_id: new_trace_id(),
                    span_id: new_span_id(),
                    parent_span_id: None,
                    sampled: false,
                    tags: BTreeMap::new(),
                };
                (context, BTreeMap::new(), Vec::new())
            }
        };

        let mut tracestate = tracestate;
        tracestate.insert("spanId".to_string(), context.span_id.clone());

        let tracing_span = tracing::info_span!(
            "span",
            name = %name,
            trace_id = %context.trace_id,
            span_id = %context.span_id
        );

        TraceSpan {
            name: name.to_string(),
            context,
            vendor: self.vendor.clone(),
            tracestate,
            foreign_tracestate: foreign,
            errors: Vec::new(),
            started_at: Instant::now(),
            start_timestamp: Utc::now(),
            exporter: self.exporter.clone(),
            tracing_span,
            finished: false,
        }
    }
}
