//! Typed errors for FSPIOP protocol helpers.

use thiserror::Error;

use crate::signing::SigningError;

/// Errors raised while decoding or building protocol artifacts.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload looked like a data URI but could not be parsed
    #[error("invalid data URI: {reason}")]
    InvalidDataUri { reason: String },

    /// Base64 section of a data URI did not decode
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Payload body was not valid JSON
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload body was not UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload was neither a string nor a JSON object
    #[error("unsupported payload shape: {0}")]
    UnsupportedPayload(String),

    /// Signing provider failed
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
