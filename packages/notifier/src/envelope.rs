//! Raw log messages and the notification envelope they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use fspiop::{decode_payload, ApiErrorObject, DecodedPayload};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::commit::Acknowledge;
use crate::error::NotifierError;

// =============================================================================
// Log Message
// =============================================================================

/// One record read from the durable log.
#[derive(Clone)]
pub struct LogMessage {
    pub topic: String,
    /// Stream sequence of the record.
    pub offset: u64,
    pub payload: Bytes,
    /// `payload` parsed as JSON, `None` if it is not JSON.
    pub value: Option<Value>,
    acker: Option<Arc<dyn Acknowledge>>,
}

impl LogMessage {
    pub fn new(topic: impl Into<String>, offset: u64, payload: Bytes) -> Self {
        let value = serde_json::from_slice(&payload).ok();
        Self {
            topic: topic.into(),
            offset,
            payload,
            value,
            acker: None,
        }
    }

    pub fn from_value(topic: impl Into<String>, offset: u64, value: Value) -> Self {
        Self {
            topic: topic.into(),
            offset,
            payload: Bytes::from(value.to_string()),
            value: Some(value),
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn Acknowledge>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn acker(&self) -> Option<&Arc<dyn Acknowledge>> {
        self.acker.as_ref()
    }
}

impl fmt::Debug for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogMessage")
            .field("topic", &self.topic)
            .field("offset", &self.offset)
            .field("len", &self.payload.len())
            .field("has_acker", &self.acker.is_some())
            .finish()
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    pub content: Content,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(deserialize_with = "string_map")]
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
    #[serde(rename = "uriParams", default, skip_serializing_if = "Option::is_none")]
    pub uri_params: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub state: EventState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventState {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Header values arrive as strings, numbers or booleans.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn present<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    value.pointer(pointer).filter(|v| !v.is_null())
}

/// Check the required structure, then parse.
pub fn decode_envelope(message: &LogMessage) -> Result<NotificationEnvelope, NotifierError> {
    let value = message
        .value
        .as_ref()
        .ok_or_else(|| NotifierError::validation("message value is not valid JSON"))?;

    for (pointer, name) in [
        ("/content", "content"),
        ("/content/headers", "content.headers"),
        ("/content/payload", "content.payload"),
        ("/metadata/event", "metadata.event"),
    ] {
        if present(value, pointer).is_none() {
            return Err(NotifierError::validation(format!("missing {}", name)));
        }
    }

    serde_json::from_value(value.clone())
        .map_err(|e| NotifierError::validation_from("malformed notification envelope", e))
}

// =============================================================================
// Notification
// =============================================================================

/// A validated envelope with its payload decoded.
#[derive(Debug, Clone)]
pub struct Notification {
    pub envelope: NotificationEnvelope,
    pub transfer_id: String,
    pub decoded: DecodedPayload,
    /// Body to send on the callback.
    pub callback_payload: String,
}

impl Notification {
    pub fn from(&self) -> &str {
        &self.envelope.from
    }

    pub fn to(&self) -> &str {
        &self.envelope.to
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.envelope.content.headers
    }
}

pub fn prepare_notification(envelope: NotificationEnvelope) -> Result<Notification, NotifierError> {
    let decoded = decode_payload(&envelope.content.payload)?;
    let body = decoded.json()?;

    let transfer_id = extract_transfer_id(&body, envelope.content.uri_params.as_ref())?;

    let callback_payload = match ApiErrorObject::from_body(&body) {
        Some(remapped) => remapped?.to_json_string()?,
        None => decoded.text()?.to_string(),
    };

    Ok(Notification {
        envelope,
        transfer_id,
        decoded,
        callback_payload,
    })
}

/// `transferId` from the body, else `uriParams.id`.
pub fn extract_transfer_id(
    body: &Value,
    uri_params: Option<&BTreeMap<String, Value>>,
) -> Result<String, NotifierError> {
    let non_empty = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    body.get("transferId")
        .and_then(non_empty)
        .or_else(|| uri_params.and_then(|p| p.get("id")).and_then(non_empty))
        .ok_or_else(|| NotifierError::validation("no transfer id in payload or uriParams"))
}
