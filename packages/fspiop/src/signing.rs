//! Signing providers for the `fspiop-signature` header.
//!
//! The header synthesizer only sees the [`Signer`] trait. Which provider is
//! wired in is a deployment decision:
//! - [`StaticSigner`] returns a configured signature (test and mock switches)
//! - [`JwsSigner`] produces an RS256 signature with a PEM private key

use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    /// Key material could not be read or parsed
    #[error("signing key unavailable: {0}")]
    Key(String),

    /// Provider returned an error while signing
    #[error("signature generation failed: {0}")]
    Sign(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Provider produced no signature
    #[error("signing provider returned an empty signature")]
    Empty,
}

/// Produces a signature over a protected-header signing input.
pub trait Signer: Send + Sync {
    /// JWS `alg` value advertised in the protected header.
    fn alg(&self) -> &str;

    /// Sign the input bytes and return the base64url signature.
    fn sign(&self, input: &[u8]) -> Result<String, SigningError>;
}

/// Returns the same signature for every input.
#[derive(Debug, Clone)]
pub struct StaticSigner {
    signature: String,
}

impl StaticSigner {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

impl Signer for StaticSigner {
    fn alg(&self) -> &str {
        "RS256"
    }

    fn sign(&self, _input: &[u8]) -> Result<String, SigningError> {
        if self.signature.is_empty() {
            return Err(SigningError::Empty);
        }
        Ok(self.signature.clone())
    }
}

/// RS256 signer backed by an RSA private key.
#[derive(Clone)]
pub struct JwsSigner {
    key: EncodingKey,
}

impl JwsSigner {
    /// Build from PEM-encoded RSA private key bytes (PKCS#1 or PKCS#8).
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, SigningError> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(|e| SigningError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    /// Read the key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, SigningError> {
        let path = path.as_ref();
        let pem = std::fs::read(path)
            .map_err(|e| SigningError::Key(format!("{}: {}", path.display(), e)))?;
        Self::from_rsa_pem(&pem)
    }
}

impl std::fmt::Debug for JwsSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwsSigner").field("alg", &"RS256").finish()
    }
}

impl Signer for JwsSigner {
    fn alg(&self) -> &str {
        "RS256"
    }

    fn sign(&self, input: &[u8]) -> Result<String, SigningError> {
        jsonwebtoken::crypto::sign(input, &self.key, Algorithm::RS256)
            .map_err(|e| SigningError::Sign(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_signer_ignores_input() {
        let signer = StaticSigner::new("sig");
        assert_eq!(signer.sign(b"a").unwrap(), "sig");
        assert_eq!(signer.sign(b"b").unwrap(), "sig");
        assert_eq!(signer.alg(), "RS256");
    }

    #[test]
    fn test_empty_static_signature_fails() {
        let signer = StaticSigner::new("");
        assert!(matches!(signer.sign(b"a"), Err(SigningError::Empty)));
    }

    #[test]
    fn test_jws_signer_rejects_garbage_key() {
        let err = JwsSigner::from_rsa_pem(b"not a key").unwrap_err();
        assert!(matches!(err, SigningError::Key(_)));
    }

    #[test]
    fn test_jws_signer_missing_file() {
        let err = JwsSigner::from_pem_file("/nonexistent/key.pem").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/key.pem"));
    }
}
