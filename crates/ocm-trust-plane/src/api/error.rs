//! API error types and responses
//!
//! Rejections carry a stable code and a generic message. Internal detail is
//! logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::policy::ReasonCode;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing signature")]
    SignatureRequired,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Peer is signing-capable but sent an unsigned request")]
    UnsignedFromSigningPeer,

    #[error("No peer identity")]
    MissingPeer,

    #[error("Signer {signer} does not match declared peer {declared}")]
    SignerMismatch { signer: String, declared: String },

    #[error("Content-Digest mismatch")]
    DigestMismatch,

    #[error("Peer denied: {0}")]
    PolicyDenied(ReasonCode),

    #[error("Peer discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::DigestMismatch => StatusCode::BAD_REQUEST,
            ApiError::SignatureRequired
            | ApiError::InvalidSignature(_)
            | ApiError::UnsignedFromSigningPeer
            | ApiError::MissingPeer => StatusCode::UNAUTHORIZED,
            ApiError::SignerMismatch { .. } | ApiError::PolicyDenied(_) => StatusCode::FORBIDDEN,
            ApiError::DiscoveryFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::SignatureRequired => "SIGNATURE_REQUIRED",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ApiError::UnsignedFromSigningPeer => "SIGNATURE_REQUIRED",
            ApiError::MissingPeer => "MISSING_PEER",
            ApiError::SignerMismatch { .. } => "SIGNER_MISMATCH",
            ApiError::DigestMismatch => "DIGEST_MISMATCH",
            ApiError::PolicyDenied(_) => "PEER_NOT_ALLOWED",
            ApiError::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (message, details) = match &self {
            ApiError::BadRequest(_) => ("Malformed request", None),
            ApiError::SignatureRequired | ApiError::UnsignedFromSigningPeer => {
                ("Request signature required", None)
            }
            ApiError::InvalidSignature(_) => ("Request signature invalid", None),
            ApiError::MissingPeer => ("Peer could not be identified", None),
            ApiError::SignerMismatch { .. } => ("Signer does not match the declared peer", None),
            ApiError::DigestMismatch => ("Content-Digest does not match the body", None),
            ApiError::PolicyDenied(reason) => (
                "Peer not allowed",
                Some(serde_json::json!({ "reason": reason.as_str() })),
            ),
            ApiError::DiscoveryFailed(_) => ("Peer discovery failed", None),
            ApiError::PayloadTooLarge(_) => ("Request body too large", None),
            ApiError::Internal(_) => ("Internal error", None),
        };

        let body = ErrorResponse {
            error: message.to_string(),
            code: self.code().to_string(),
            details,
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<ocm_trust_core::TrustError> for ApiError {
    fn from(err: ocm_trust_core::TrustError) -> Self {
        use ocm_trust_core::TrustError;
        match err {
            TrustError::DigestMismatch => ApiError::DigestMismatch,
            TrustError::MalformedDigest(msg) => ApiError::BadRequest(msg),
            TrustError::InvalidAuthority { .. } | TrustError::InvalidUrl(_) => {
                ApiError::BadRequest(err.to_string())
            }
            TrustError::NoSigningKey | TrustError::KeyStorage(_) => ApiError::Internal(err.to_string()),
            other => ApiError::InvalidSignature(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::PolicyDenied(ReasonCode::NotAllowed).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::SignatureRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidSignature("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::SignerMismatch {
                signer: "a".into(),
                declared: "b".into()
            }
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::DigestMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::DiscoveryFailed("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::PayloadTooLarge(1).status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_trust_errors_map_by_kind() {
        use ocm_trust_core::TrustError;
        assert!(matches!(ApiError::from(TrustError::DigestMismatch), ApiError::DigestMismatch));
        assert!(matches!(
            ApiError::from(TrustError::SignatureInvalid("bad".into())),
            ApiError::InvalidSignature(_)
        ));
        assert!(matches!(
            ApiError::from(TrustError::MalformedSignatureHeader("bad".into())),
            ApiError::InvalidSignature(_)
        ));
    }
}
