//! Payload streaming codec.
//!
//! Message payloads travel either as an RFC 2397 data URI
//! (`data:<mime>[;k=v]*;base64,<data>`) or in plain form (a JSON string or an
//! inline JSON object). Detection is a syntax check on the value, so a plain
//! JSON body that happens to start with the same bytes is never mistaken for
//! an encoded one.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use serde_json::Value;

use crate::error::{ProtocolError, Result};

const DEFAULT_DATA_URI_MIME: &str = "text/plain";
const PLAIN_PAYLOAD_MIME: &str = "application/json";

fn data_uri_regex() -> &'static Regex {
    static DATA_URI: OnceLock<Regex> = OnceLock::new();
    DATA_URI.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*data:(?P<mime>[a-z]+/[a-z0-9\-+.]+)?(?P<params>(?:;[a-z\-]+=[a-z0-9\-.]+)*)(?P<base64>;base64)?,(?P<data>[a-z0-9!$&',()*+;=\-._~:@/?%\s]*?)\s*$",
        )
        .expect("data URI pattern is valid")
    })
}

/// A decoded payload with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub mime_type: String,
    pub parameters: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// `true` when the payload arrived as a data URI.
    pub encoded: bool,
}

impl DecodedPayload {
    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Whether a string is a well-formed data URI.
pub fn is_data_uri(input: &str) -> bool {
    data_uri_regex().is_match(input)
}

/// Encode raw bytes as a base64 data URI with the given media type.
///
/// Parameters on the media type (`;version=1.0`) are kept as-is.
pub fn encode_payload(body: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(body))
}

/// Decode a payload value.
///
/// Strings are checked for data URI syntax first and otherwise taken as the
/// plain body. JSON objects and arrays are serialized back to bytes.
pub fn decode_payload(payload: &Value) -> Result<DecodedPayload> {
    match payload {
        Value::String(s) if is_data_uri(s) => decode_data_uri(s),
        Value::String(s) => Ok(plain(s.as_bytes().to_vec())),
        Value::Object(_) | Value::Array(_) => Ok(plain(serde_json::to_vec(payload)?)),
        other => Err(ProtocolError::UnsupportedPayload(json_kind(other).to_string())),
    }
}

fn plain(body: Vec<u8>) -> DecodedPayload {
    DecodedPayload {
        mime_type: PLAIN_PAYLOAD_MIME.to_string(),
        parameters: BTreeMap::new(),
        body,
        encoded: false,
    }
}

fn decode_data_uri(input: &str) -> Result<DecodedPayload> {
    let captures = data_uri_regex()
        .captures(input)
        .ok_or_else(|| ProtocolError::InvalidDataUri {
            reason: "does not match data URI syntax".to_string(),
        })?;

    let mime_type = captures
        .name("mime")
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_DATA_URI_MIME.to_string());

    let parameters = captures
        .name("params")
        .map(|m| parse_parameters(m.as_str()))
        .unwrap_or_default();

    let data = captures.name("data").map(|m| m.as_str()).unwrap_or("");
    let body = if captures.name("base64").is_some() {
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(compact.as_bytes())?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };

    Ok(DecodedPayload {
        mime_type,
        parameters,
        body,
        encoded: true,
    })
}

fn parse_parameters(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_json_structure() {
        let original = json!({
            "transferId": "abc-123",
            "amount": { "currency": "USD", "amount": "100.5" },
            "ilpPacket": "AYIBgQAAAAAAAASwNGxldmVsb25lLmRmc3BhLm1zaXNkbi4xMjM0NTY3ODkwMTIz"
        });
        let body = serde_json::to_vec(&original).unwrap();
        let encoded = encode_payload(&body, TRANSFERS_MIME);

        assert!(is_data_uri(&encoded));
        let decoded = decode_payload(&Value::String(encoded)).unwrap();
        assert!(decoded.encoded);
        assert_eq!(decoded.json().unwrap(), original);
    }

    const TRANSFERS_MIME: &str = "application/vnd.interoperability.transfers+json;version=1.0";

    #[test]
    fn test_data_uri_mime_and_parameters() {
        let encoded = encode_payload(b"{}", TRANSFERS_MIME);
        let decoded = decode_payload(&Value::String(encoded)).unwrap();
        assert_eq!(
            decoded.mime_type,
            "application/vnd.interoperability.transfers+json"
        );
        assert_eq!(decoded.parameters.get("version").map(String::as_str), Some("1.0"));
    }

    #[test]
    fn test_plain_string_payload_is_not_encoded() {
        let decoded = decode_payload(&json!("{\"transferId\":\"t-1\"}")).unwrap();
        assert!(!decoded.encoded);
        assert_eq!(decoded.json().unwrap()["transferId"], "t-1");
    }

    #[test]
    fn test_plain_text_starting_with_data_is_not_a_data_uri() {
        assert!(!is_data_uri("data: not really"));
        assert!(!is_data_uri("{\"data:\":1}"));
    }

    #[test]
    fn test_inline_object_payload() {
        let decoded = decode_payload(&json!({ "transferId": "t-2" })).unwrap();
        assert_eq!(decoded.json().unwrap(), json!({ "transferId": "t-2" }));
    }

    #[test]
    fn test_percent_encoded_data_uri() {
        let decoded = decode_payload(&json!("data:text/plain,hello%20world")).unwrap();
        assert_eq!(decoded.text().unwrap(), "hello world");
        assert_eq!(decoded.mime_type, "text/plain");
    }

    #[test]
    fn test_percent_encoded_json_body() {
        let decoded =
            decode_payload(&json!("data:application/json,%7B%22transferId%22%3A%22t-%C3%A9%22%7D")).unwrap();
        assert_eq!(decoded.json().unwrap()["transferId"], "t-é");
    }

    #[test]
    fn test_malformed_base64_fails() {
        let result = decode_payload(&json!("data:application/json;base64,@@@@"));
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_payload_shape() {
        let err = decode_payload(&json!(42)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedPayload(kind) if kind == "number"));
    }
}
