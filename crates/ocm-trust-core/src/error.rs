//! Error types for the federation trust core

use thiserror::Error;

/// Result type alias using TrustError
pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors that can occur in the trust core primitives
#[derive(Error, Debug)]
pub enum TrustError {
    /// Authority is not a schemeless `host[:port]`
    #[error("Invalid authority '{input}': {reason}")]
    InvalidAuthority { input: String, reason: String },

    /// URL could not be split into scheme and authority
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    /// No signing key has been loaded yet
    #[error("No signing key loaded")]
    NoSigningKey,

    /// Key file could not be read or written
    #[error("Key storage error: {0}")]
    KeyStorage(String),

    /// Key material could not be parsed
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Algorithm name not in the supported set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Body is not a JWS envelope in any supported serialization
    #[error("Malformed signature envelope: {0}")]
    MalformedEnvelope(String),

    /// Signature did not validate
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// `Signature-Input` / `Signature` headers could not be parsed
    #[error("Malformed signature header: {0}")]
    MalformedSignatureHeader(String),

    /// `Content-Digest` header could not be parsed
    #[error("Malformed content digest: {0}")]
    MalformedDigest(String),

    /// `Content-Digest` does not match the body
    #[error("Content digest mismatch")]
    DigestMismatch,

    /// Cryptographic backend error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TrustError {
    pub(crate) fn invalid_authority(input: &str, reason: impl Into<String>) -> Self {
        TrustError::InvalidAuthority {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ed25519_dalek::SignatureError> for TrustError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        TrustError::SignatureInvalid(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for TrustError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        TrustError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        TrustError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for TrustError {
    fn from(err: base64::DecodeError) -> Self {
        TrustError::SerializationError(format!("invalid base64: {}", err))
    }
}
