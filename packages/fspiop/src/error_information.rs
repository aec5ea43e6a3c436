//! `errorInformation` bodies and the API error object sent back to FSPs.
//!
//! A callback whose source body carries `errorInformation` is never passed
//! through verbatim. The body is rebuilt into an [`ApiErrorObject`] holding
//! only the code, description and extension list.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Known API error codes and their canonical messages.
const API_ERROR_CODES: &[(&str, &str)] = &[
    ("1000", "Communication error"),
    ("1001", "Destination communication error"),
    ("2000", "Generic server error"),
    ("2001", "Internal server error"),
    ("2003", "Service currently unavailable"),
    ("3000", "Generic client error"),
    ("3100", "Generic validation error"),
    ("3105", "Invalid signature"),
    ("3200", "Generic ID not found"),
    ("3201", "Destination FSP Error"),
    ("3208", "Transfer ID not found"),
    ("5000", "Generic payee error"),
];

/// Canonical message for an API error code, if known.
pub fn api_error_message(code: &str) -> Option<&'static str> {
    API_ERROR_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, message)| *message)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionList {
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    #[serde(deserialize_with = "code_as_string")]
    pub error_code: String,
    #[serde(default)]
    pub error_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<ExtensionList>,
}

/// Error codes show up both as `"3100"` and `3100`.
fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "errorCode must be a string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorObject {
    pub error_information: ErrorInformation,
}

impl ApiErrorObject {
    /// Rebuild an API error object from a raw `errorInformation` value.
    ///
    /// An empty description is replaced with the canonical message for the
    /// code. Extensions are kept in their original order.
    pub fn from_error_information(raw: &Value) -> Result<Self> {
        let mut info: ErrorInformation = serde_json::from_value(raw.clone())?;
        if info.error_description.trim().is_empty() {
            if let Some(message) = api_error_message(&info.error_code) {
                info.error_description = message.to_string();
            }
        }
        if matches!(&info.extension_list, Some(list) if list.extension.is_empty()) {
            info.extension_list = None;
        }
        Ok(Self {
            error_information: info,
        })
    }

    /// Look for `errorInformation` in a decoded body.
    pub fn from_body(body: &Value) -> Option<Result<Self>> {
        body.get("errorInformation").map(Self::from_error_information)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
