//! # fspiop
//!
//! Protocol-level building blocks for talking to FSPIOP counterparties.
//!
//! - [`streaming`] encodes and decodes message payloads (data URIs or plain JSON)
//! - [`error_information`] re-maps `errorInformation` bodies into API error objects
//! - [`signing`] holds the [`Signer`] contract and its static / RS256 providers
//! - [`headers`] synthesizes reversed-direction callback headers with a signed
//!   protected header
//!
//! Nothing in this crate does IO. Transports, lookups and log clients live in
//! the services that use it.

pub mod enums;
pub mod error;
pub mod error_information;
pub mod headers;
pub mod signing;
pub mod streaming;

pub use enums::{EndpointTemplate, EndpointType, HttpMethod, TRANSFERS_CONTENT_TYPE};
pub use error::{ProtocolError, Result};
pub use error_information::{ApiErrorObject, ErrorInformation};
pub use headers::{
    create_callback_headers, format_http_date, CallbackHeaderParams, CallbackHeaders,
    FspiopSignature, SignedProtectedHeader,
};
pub use signing::{JwsSigner, Signer, SigningError, StaticSigner};
pub use streaming::{decode_payload, encode_payload, is_data_uri, DecodedPayload};
