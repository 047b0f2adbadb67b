//! Error types for directory fetches and peer discovery

use thiserror::Error;

/// Result type for directory and discovery operations
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors that can occur while fetching listings or discovering peers
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Connection or protocol failure
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its time budget
    #[error("Request timed out")]
    Timeout,

    /// Remote answered with a non-2xx status
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// Response exceeded the size cap
    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    /// Keys are configured but none is active
    #[error("No active keys")]
    NoActiveKeys,

    /// Verification is required but the body is not a signature envelope
    #[error("Signed listing required: {0}")]
    EnvelopeRequired(String),

    /// No active key validated the listing
    #[error("Listing signature verification failed: {0}")]
    SignatureVerification(String),

    /// Payload does not match the listing schema
    #[error("Invalid listing: {0}")]
    Schema(String),

    /// Peer discovery failed or returned unusable data
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// URL or authority could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl DirectoryError {
    /// Short stable label for logs and metrics fields
    pub fn kind(&self) -> &'static str {
        match self {
            DirectoryError::Network(_) => "network",
            DirectoryError::Timeout => "timeout",
            DirectoryError::Status(_) => "status",
            DirectoryError::BodyTooLarge(_) => "body_too_large",
            DirectoryError::NoActiveKeys => "no_active_keys",
            DirectoryError::EnvelopeRequired(_) => "envelope_required",
            DirectoryError::SignatureVerification(_) => "signature",
            DirectoryError::Schema(_) => "schema",
            DirectoryError::Discovery(_) => "discovery",
            DirectoryError::InvalidUrl(_) => "invalid_url",
        }
    }

    /// Transport-level failures, as opposed to integrity or schema failures
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DirectoryError::Network(_)
                | DirectoryError::Timeout
                | DirectoryError::Status(_)
                | DirectoryError::BodyTooLarge(_)
        )
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DirectoryError::Timeout
        } else {
            DirectoryError::Network(err.to_string())
        }
    }
}

impl From<ocm_trust_core::TrustError> for DirectoryError {
    fn from(err: ocm_trust_core::TrustError) -> Self {
        use ocm_trust_core::TrustError;
        match err {
            TrustError::InvalidAuthority { .. } | TrustError::InvalidUrl(_) => {
                DirectoryError::InvalidUrl(err.to_string())
            }
            TrustError::SignatureInvalid(msg) => DirectoryError::SignatureVerification(msg),
            other => DirectoryError::Schema(other.to_string()),
        }
    }
}
