//! Callback header synthesis.
//!
//! A callback flows back to whoever initiated the original action, so the
//! inbound direction is reversed: the inbound destination becomes
//! `fspiop-source` and the inbound source becomes `fspiop-destination`.
//! `fspiop-signature` wraps a base64url protected header and the signature
//! the configured [`Signer`] produced over it.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{header, EndpointTemplate, HttpMethod, TRANSFERS_CONTENT_TYPE};
use crate::signing::{Signer, SigningError};

/// Inbound headers that are never copied onto a callback.
const NON_FORWARDED: &[&str] = &[
    header::CONTENT_TYPE,
    header::DATE,
    header::FSPIOP_SOURCE,
    header::FSPIOP_DESTINATION,
    header::FSPIOP_SIGNATURE,
    header::FSPIOP_HTTP_METHOD,
    header::FSPIOP_URI,
    "content-length",
    "host",
    "connection",
    "transfer-encoding",
];

/// Inputs for [`create_callback_headers`].
#[derive(Debug, Clone)]
pub struct CallbackHeaderParams<'a> {
    /// FSP the inbound event was addressed to. Signs as the callback source.
    pub dfsp_id: &'a str,
    /// FSP that initiated the inbound action. Receives the callback.
    pub counterparty: &'a str,
    pub transfer_id: &'a str,
    /// Inbound message headers; non-reserved ones are carried over.
    pub headers: &'a BTreeMap<String, String>,
    pub http_method: HttpMethod,
    pub endpoint_template: EndpointTemplate,
}

/// The header block embedded (base64url) in `fspiop-signature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProtectedHeader {
    pub alg: String,
    #[serde(rename = "fspiop-source")]
    pub fspiop_source: String,
    #[serde(rename = "fspiop-destination")]
    pub fspiop_destination: String,
    #[serde(rename = "fspiop-uri")]
    pub fspiop_uri: String,
    #[serde(rename = "fspiop-http-method")]
    pub fspiop_http_method: String,
    #[serde(rename = "Date")]
    pub date: String,
}

impl SignedProtectedHeader {
    /// base64url (unpadded) encoding of the JSON form.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain strings cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// JSON value of the `fspiop-signature` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FspiopSignature {
    pub signature: String,
    #[serde(rename = "protectedHeader")]
    pub protected_header: String,
}

/// Outbound callback headers, keyed by lower-case name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackHeaders(BTreeMap<String, String>);

impl CallbackHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.get(header::FSPIOP_SOURCE)
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(header::FSPIOP_DESTINATION)
    }

    pub fn uri(&self) -> Option<&str> {
        self.get(header::FSPIOP_URI)
    }

    /// Parsed `fspiop-signature` value.
    pub fn signature(&self) -> Option<FspiopSignature> {
        self.get(header::FSPIOP_SIGNATURE)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// RFC 1123 date as used in the `date` header.
pub fn format_http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build reversed-direction headers for a callback.
pub fn create_callback_headers(
    params: &CallbackHeaderParams<'_>,
    signer: &dyn Signer,
    now: DateTime<Utc>,
) -> Result<CallbackHeaders, SigningError> {
    let date = format_http_date(now);
    let uri = params.endpoint_template.render(params.transfer_id);
    let method = params.http_method.as_str().to_string();

    let protected = SignedProtectedHeader {
        alg: signer.alg().to_string(),
        fspiop_source: params.dfsp_id.to_string(),
        fspiop_destination: params.counterparty.to_string(),
        fspiop_uri: uri.clone(),
        fspiop_http_method: method.clone(),
        date: date.clone(),
    };
    let protected_header = protected.encode();
    let signature = signer.sign(protected_header.as_bytes())?;
    if signature.is_empty() {
        return Err(SigningError::Empty);
    }
    let signature_json = serde_json::to_string(&FspiopSignature {
        signature,
        protected_header,
    })
    .map_err(|e| SigningError::Sign(Box::new(e)))?;

    let mut out: BTreeMap<String, String> = params
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .filter(|(k, _)| !NON_FORWARDED.contains(&k.as_str()))
        .collect();

    out.insert(header::CONTENT_TYPE.into(), TRANSFERS_CONTENT_TYPE.into());
    out.insert(header::FSPIOP_SOURCE.into(), params.dfsp_id.into());
    out.insert(header::FSPIOP_DESTINATION.into(), params.counterparty.into());
    out.insert(header::DATE.into(), date);
    out.insert(header::FSPIOP_SIGNATURE.into(), signature_json);
    out.insert(header::FSPIOP_HTTP_METHOD.into(), method);
    out.insert(header::FSPIOP_URI.into(), uri);

    Ok(CallbackHeaders(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::StaticSigner;
    use chrono::TimeZone;

    fn inbound_headers() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("FSPIOP-Source".to_string(), "dfspA".to_string()),
            ("fspiop-destination".to_string(), "dfspB".to_string()),
            ("Accept".to_string(), "application/vnd.interoperability.transfers+json;version=1".to_string()),
            ("content-length".to_string(), "1234".to_string()),
        ])
    }

    fn params(headers: &BTreeMap<String, String>) -> CallbackHeaderParams<'_> {
        CallbackHeaderParams {
            dfsp_id: "dfspB",
            counterparty: "dfspA",
            transfer_id: "abc-123",
            headers,
            http_method: HttpMethod::Put,
            endpoint_template: EndpointTemplate::TransfersPutError,
        }
    }

    #[test]
    fn test_direction_is_reversed() {
        let inbound = inbound_headers();
        let signer = StaticSigner::new("sig");
        let headers = create_callback_headers(&params(&inbound), &signer, Utc::now()).unwrap();

        assert_eq!(headers.source(), Some("dfspB"));
        assert_eq!(headers.destination(), Some("dfspA"));
        assert_eq!(headers.uri(), Some("/transfers/abc-123/error"));
        assert_eq!(headers.get("fspiop-http-method"), Some("PUT"));
        assert_eq!(headers.get("content-type"), Some(TRANSFERS_CONTENT_TYPE));
    }

    #[test]
    fn test_inbound_headers_are_filtered() {
        let inbound = inbound_headers();
        let signer = StaticSigner::new("sig");
        let headers = create_callback_headers(&params(&inbound), &signer, Utc::now()).unwrap();

        assert!(headers.get("accept").is_some());
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.iter().count(), 8);
    }

    #[test]
    fn test_protected_header_matches_outer_headers() {
        let inbound = inbound_headers();
        let signer = StaticSigner::new("sig");
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let headers = create_callback_headers(&params(&inbound), &signer, now).unwrap();

        let signature = headers.signature().unwrap();
        assert_eq!(signature.signature, "sig");
        let protected = SignedProtectedHeader::decode(&signature.protected_header).unwrap();
        assert_eq!(
            protected,
            SignedProtectedHeader {
                alg: "RS256".to_string(),
                fspiop_source: "dfspB".to_string(),
                fspiop_destination: "dfspA".to_string(),
                fspiop_uri: "/transfers/abc-123/error".to_string(),
                fspiop_http_method: "PUT".to_string(),
                date: "Wed, 14 Oct 2026 09:30:00 GMT".to_string(),
            }
        );
        assert_eq!(headers.get("date"), Some("Wed, 14 Oct 2026 09:30:00 GMT"));
    }

    #[test]
    fn test_synthesis_is_stable_apart_from_dates() {
        let inbound = inbound_headers();
        let signer = StaticSigner::new("sig");
        let first_at = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let second_at = Utc.with_ymd_and_hms(2026, 10, 14, 9, 31, 7).unwrap();

        let first = create_callback_headers(&params(&inbound), &signer, first_at).unwrap();
        let second = create_callback_headers(&params(&inbound), &signer, second_at).unwrap();

        let strip = |h: &CallbackHeaders| {
            let mut map = h.as_map().clone();
            map.remove("date");
            map.remove("fspiop-signature");
            map
        };
        assert_eq!(strip(&first), strip(&second));
        assert_ne!(first.get("date"), second.get("date"));

        let mut first_protected =
            SignedProtectedHeader::decode(&first.signature().unwrap().protected_header).unwrap();
        let second_protected =
            SignedProtectedHeader::decode(&second.signature().unwrap().protected_header).unwrap();
        assert_ne!(first_protected.date, second_protected.date);
        first_protected.date = second_protected.date.clone();
        assert_eq!(first_protected, second_protected);
    }

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn alg(&self) -> &str {
            "RS256"
        }

        fn sign(&self, _input: &[u8]) -> Result<String, SigningError> {
            Err(SigningError::Key("hsm offline".to_string()))
        }
    }

    #[test]
    fn test_signer_failure_is_returned() {
        let inbound = inbound_headers();
        let err = create_callback_headers(&params(&inbound), &FailingSigner, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("hsm offline"));
    }
}
