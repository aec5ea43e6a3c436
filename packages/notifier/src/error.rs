//! Error taxonomy and normalization for the notification pipeline.
//!
//! Every failure is one of five kinds. The top-level message handler is the
//! only place that turns a [`NotifierError`] into log lines and metrics, via
//! [`normalize`], which also walks the `source()` chain to surface the deepest
//! underlying cause.

use std::fmt;

use fspiop::{EndpointType, ProtocolError, SigningError};
use thiserror::Error;

/// Maximum number of `source()` hops followed by [`normalize`].
pub const MAX_CAUSE_DEPTH: usize = 16;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum NotifierError {
    /// Malformed or incomplete envelope. No side effect has happened.
    #[error("invalid message: {reason}")]
    Validation {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// No usable callback endpoint for the destination FSP.
    #[error("endpoint lookup failed for {fsp} ({endpoint_type}): {reason}")]
    Lookup {
        fsp: String,
        endpoint_type: EndpointType,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Signing provider failed to produce `fspiop-signature`.
    #[error("callback signing failed: {0}")]
    Signing(#[from] SigningError),

    /// Transport failure sending a callback or re-emitted event.
    #[error("delivery failed: {reason}")]
    Delivery {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Anything else: log-client read errors, unexpected decode failures.
    #[error("{reason}")]
    Internal {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl NotifierError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn validation_from(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Validation {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn lookup(fsp: &str, endpoint_type: EndpointType, reason: impl Into<String>) -> Self {
        Self::Lookup {
            fsp: fsp.to_string(),
            endpoint_type,
            reason: reason.into(),
            source: None,
        }
    }

    pub fn lookup_from(
        fsp: &str,
        endpoint_type: EndpointType,
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Lookup {
            fsp: fsp.to_string(),
            endpoint_type,
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::Delivery {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn delivery_from(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Delivery {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn internal_from(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifierError::Validation { .. } => ErrorKind::Validation,
            NotifierError::Lookup { .. } => ErrorKind::Lookup,
            NotifierError::Signing(_) => ErrorKind::Signing,
            NotifierError::Delivery { .. } => ErrorKind::Delivery,
            NotifierError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<ProtocolError> for NotifierError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Signing(e) => NotifierError::Signing(e),
            other => NotifierError::validation_from("payload could not be decoded", other),
        }
    }
}

/// Error classification carried through logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Lookup,
    Signing,
    Delivery,
    Internal,
}

impl ErrorKind {
    /// FSPIOP API error code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "3100",
            ErrorKind::Lookup => "3201",
            ErrorKind::Signing => "2001",
            ErrorKind::Delivery => "1001",
            ErrorKind::Internal => "2001",
        }
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Lookup => "lookup",
            ErrorKind::Signing => "signing",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Uniform error shape used for logging, span state and metric labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedError {
    /// Kind of the top-level error.
    pub kind: ErrorKind,
    pub code: &'static str,
    /// Canonical API message for `code`.
    pub api_message: &'static str,
    /// Display of the top-level error.
    pub message: String,
    /// Kind of the deepest [`NotifierError`] in the chain.
    pub root_kind: ErrorKind,
    /// Display of the deepest cause in the chain.
    pub deepest_cause: String,
    /// Number of `source()` hops walked.
    pub depth: usize,
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.api_message, self.message)
    }
}

/// Normalize an error, walking at most [`MAX_CAUSE_DEPTH`] causes.
pub fn normalize(err: &NotifierError) -> NormalizedError {
    let kind = err.kind();
    let mut root_kind = kind;
    let mut deepest_cause = err.to_string();
    let mut depth = 0;

    let mut current: &(dyn std::error::Error + 'static) = err;
    while depth < MAX_CAUSE_DEPTH {
        let Some(next) = current.source() else {
            break;
        };
        if let Some(domain) = next.downcast_ref::<NotifierError>() {
            root_kind = domain.kind();
        }
        deepest_cause = next.to_string();
        current = next;
        depth += 1;
    }

    let code = kind.code();
    NormalizedError {
        kind,
        code,
        api_message: fspiop::error_information::api_error_message(code).unwrap_or("Unknown error"),
        message: err.to_string(),
        root_kind,
        deepest_cause,
        depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(NotifierError::validation("x").kind().code(), "3100");
        assert_eq!(
            NotifierError::lookup("dfspB", EndpointType::TransferPost, "none").kind().code(),
            "3201"
        );
        assert_eq!(NotifierError::delivery("x").kind().code(), "1001");
        assert_eq!(NotifierError::internal("x").kind().code(), "2001");
        assert_eq!(NotifierError::from(SigningError::Empty).kind(), ErrorKind::Signing);
    }

    #[test]
    fn test_normalize_surfaces_deepest_cause_and_keeps_top_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "broker refused");
        let inner = NotifierError::delivery_from("publish failed", io);
        let outer = NotifierError::internal_from("error processing notification message", inner);

        let normalized = normalize(&outer);
        assert_eq!(normalized.kind, ErrorKind::Internal);
        assert_eq!(normalized.root_kind, ErrorKind::Delivery);
        assert_eq!(normalized.deepest_cause, "broker refused");
        assert_eq!(normalized.depth, 2);
        assert_eq!(normalized.api_message, "Internal server error");
    }

    #[test]
    fn test_normalize_without_source() {
        let normalized = normalize(&NotifierError::validation("missing content.headers"));
        assert_eq!(normalized.depth, 0);
        assert_eq!(normalized.deepest_cause, "invalid message: missing content.headers");
        assert_eq!(normalized.to_string(), "[3100] Generic validation error: invalid message: missing content.headers");
    }

    /// An error whose source is itself, as a malformed chain would be.
    #[derive(Debug)]
    struct Cyclic;

    impl fmt::Display for Cyclic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("cyclic")
        }
    }

    impl std::error::Error for Cyclic {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(self)
        }
    }

    #[test]
    fn test_normalize_stops_on_cyclic_chain() {
        let err = NotifierError::internal_from("loop", Cyclic);
        let normalized = normalize(&err);
        assert_eq!(normalized.depth, MAX_CAUSE_DEPTH);
        assert_eq!(normalized.deepest_cause, "cyclic");
    }

    #[test]
    fn test_protocol_errors_map_to_validation() {
        let err: NotifierError = ProtocolError::UnsupportedPayload("number".into()).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err: NotifierError = ProtocolError::Signing(SigningError::Empty).into();
        assert_eq!(err.kind(), ErrorKind::Signing);
    }
}
