//! Inbound request middleware
//!
//! [`verify_signature`] resolves who sent a federated request and attaches a
//! [`PeerIdentity`] to the request extensions:
//!
//! ```text
//! mode off            -> pass through untouched
//! signature present   -> verify (401 on failure), compare with declared peer (403 on mismatch)
//! no signature        -> strict: 401
//!                        lenient: declared peer, unless discovery says it signs (401)
//!                                 or discovery fails in fail-closed mode (502)
//! Content-Digest      -> checked against the body whenever present (400 on mismatch)
//! ```
//!
//! [`enforce_policy`] then runs the attached identity through the policy
//! engine and stops denied peers with 403. Without an identity, only a
//! disabled policy lets the request through.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::HOST, HeaderMap, Method, Uri},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use ocm_trust_core::authority::{authority_from_url, key_id_authority, split_url};
use ocm_trust_core::httpsig::{verify_content_digest, CONTENT_DIGEST_HEADER};
use ocm_trust_core::{
    normalize, Authority, HttpSignature, MessageComponents, PeerIdentity, SignatureAlgorithm,
    VerifyOptions,
};
use ocm_trust_directory::PeerDiscovery;

use crate::api::error::ApiError;
use crate::policy::PolicyEngine;

/// Default cap on buffered request bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// How unsigned inbound requests are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMode {
    /// No verification at all
    Off,
    /// Verify signatures when present, accept declared peers otherwise
    #[default]
    Lenient,
    /// Every request must be signed
    Strict,
}

impl FromStr for SignatureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(SignatureMode::Off),
            "lenient" => Ok(SignatureMode::Lenient),
            "strict" => Ok(SignatureMode::Strict),
            other => Err(format!("unknown signature mode: {}", other)),
        }
    }
}

impl fmt::Display for SignatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignatureMode::Off => "off",
            SignatureMode::Lenient => "lenient",
            SignatureMode::Strict => "strict",
        })
    }
}

/// Pulls the declared peer out of a request body
pub type DeclaredPeerExtractor = Arc<dyn Fn(&[u8]) -> Option<String> + Send + Sync>;

/// Declared peer of an OCM protocol body
///
/// Reads `sender`, then `owner`. Values may be `user@host`, a URL, or a bare
/// authority; the authority part is returned as written.
pub fn ocm_declared_peer(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["sender", "owner"].iter().find_map(|field| {
        let raw = value.get(*field)?.as_str()?.trim();
        let authority = if raw.contains("://") {
            split_url(raw).ok()?.authority
        } else if let Some((_, host)) = raw.rsplit_once('@') {
            host
        } else {
            raw
        };
        (!authority.is_empty()).then(|| authority.to_string())
    })
}

/// Signature middleware configuration and logic
pub struct SignatureVerifier {
    mode: SignatureMode,
    discovery: Arc<dyn PeerDiscovery>,
    extract_declared: DeclaredPeerExtractor,
    allow_mismatch: bool,
    discovery_fail_open: bool,
    max_body_bytes: usize,
    max_signature_age: Duration,
    scheme: String,
}

impl SignatureVerifier {
    pub fn new(mode: SignatureMode, discovery: Arc<dyn PeerDiscovery>) -> Self {
        Self {
            mode,
            discovery,
            extract_declared: Arc::new(ocm_declared_peer),
            allow_mismatch: false,
            discovery_fail_open: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_signature_age: Duration::from_secs(300),
            scheme: "https".to_string(),
        }
    }

    pub fn with_declared_peer(mut self, extractor: DeclaredPeerExtractor) -> Self {
        self.extract_declared = extractor;
        self
    }

    /// Tolerate a signer that differs from the declared peer
    pub fn allow_mismatch(mut self, allow: bool) -> Self {
        self.allow_mismatch = allow;
        self
    }

    /// Accept unsigned declared peers when discovery is unreachable
    pub fn discovery_fail_open(mut self, fail_open: bool) -> Self {
        self.discovery_fail_open = fail_open;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_max_signature_age(mut self, max_age: Duration) -> Self {
        self.max_signature_age = max_age;
        self
    }

    /// Scheme used to normalize declared peers and to rebuild target URIs
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn mode(&self) -> SignatureMode {
        self.mode
    }

    /// Resolve the peer of a buffered request
    ///
    /// `Ok(None)` means no signature and no declared peer (or mode off).
    pub async fn resolve(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<PeerIdentity>, ApiError> {
        if self.mode == SignatureMode::Off {
            return Ok(None);
        }

        let declared = (self.extract_declared)(body);

        let signature = HttpSignature::from_headers(headers).map_err(|e| {
            warn!(error = %e, "SECURITY: Malformed signature headers");
            ApiError::InvalidSignature(e.to_string())
        })?;

        let identity = match signature {
            Some(signature) => {
                let target = self.target_uri(uri, headers)?;
                let message = MessageComponents {
                    method: method.as_str(),
                    target_uri: &target,
                    headers,
                };
                Some(self.authenticate(&signature, &message, body, declared).await?)
            }
            None => self.unsigned(declared).await?,
        };

        if let Some(value) = headers.get(CONTENT_DIGEST_HEADER) {
            let value = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Content-Digest is not ASCII".into()))?;
            verify_content_digest(value, body).map_err(|e| {
                warn!(
                    peer = ?identity.as_ref().map(|p| p.authority_for_compare.as_str()),
                    error = %e,
                    "SECURITY: Content-Digest check failed"
                );
                ApiError::from(e)
            })?;
        }

        Ok(identity)
    }

    async fn authenticate(
        &self,
        signature: &HttpSignature,
        message: &MessageComponents<'_>,
        body: &[u8],
        declared: Option<String>,
    ) -> Result<PeerIdentity, ApiError> {
        let key_id = signature
            .key_id()
            .map_err(|e| ApiError::InvalidSignature(e.to_string()))?;
        let asserted =
            key_id_authority(key_id).map_err(|e| ApiError::InvalidSignature(e.to_string()))?;

        let public_key_pem = self.discovery.public_key(key_id).await.map_err(|e| {
            warn!(key_id = %key_id, error = %e, "SECURITY: Signing key could not be resolved");
            ApiError::InvalidSignature(format!("unresolvable key {}", key_id))
        })?;

        let mut options = VerifyOptions::now();
        options.max_age = self.max_signature_age.as_secs() as i64;
        options.require_content_digest = !body.is_empty();

        let algorithm = signature
            .verify(message, &public_key_pem, SignatureAlgorithm::Ed25519, &options)
            .map_err(|e| {
                warn!(key_id = %key_id, error = %e, "SECURITY: Request signature rejected");
                ApiError::InvalidSignature(e.to_string())
            })?;

        if let Some(declared) = declared {
            if !self.allow_mismatch {
                let declared_authority = self.declared_authority(&declared)?;
                if declared_authority != asserted.normalized {
                    warn!(
                        key_id = %key_id,
                        signer = %asserted.normalized,
                        declared = %declared_authority,
                        "SECURITY: Signer does not match declared peer"
                    );
                    return Err(ApiError::SignerMismatch {
                        signer: asserted.normalized.into_string(),
                        declared: declared_authority.into_string(),
                    });
                }
            }
        }

        debug!(key_id = %key_id, peer = %asserted.normalized, algorithm = %algorithm, "Request signature verified");
        Ok(PeerIdentity::authenticated(asserted.raw, asserted.normalized, key_id))
    }

    async fn unsigned(&self, declared: Option<String>) -> Result<Option<PeerIdentity>, ApiError> {
        match self.mode {
            SignatureMode::Off => Ok(None),
            SignatureMode::Strict => {
                debug!(declared = ?declared, "Unsigned request rejected in strict mode");
                Err(ApiError::SignatureRequired)
            }
            SignatureMode::Lenient => {
                let Some(declared) = declared else {
                    return Ok(None);
                };
                let authority = self.declared_authority(&declared)?;

                match self.discovery.is_signing_capable(authority.as_str()).await {
                    Ok(false) => Ok(Some(PeerIdentity::declared(declared, authority))),
                    Ok(true) => {
                        warn!(peer = %authority, "SECURITY: Signing-capable peer sent an unsigned request");
                        Err(ApiError::UnsignedFromSigningPeer)
                    }
                    Err(e) if self.discovery_fail_open => {
                        warn!(peer = %authority, error = %e, "Discovery failed, accepting declared peer");
                        Ok(Some(PeerIdentity::declared(declared, authority)))
                    }
                    Err(e) => {
                        warn!(peer = %authority, error = %e, "Discovery failed, rejecting unsigned request");
                        Err(ApiError::DiscoveryFailed(e.to_string()))
                    }
                }
            }
        }
    }

    fn declared_authority(&self, declared: &str) -> Result<Authority, ApiError> {
        let authority = if declared.contains("://") {
            authority_from_url(declared)
        } else {
            normalize(declared, &self.scheme)
        };
        authority.map_err(|e| ApiError::BadRequest(e.to_string()))
    }

    fn target_uri(&self, uri: &Uri, headers: &HeaderMap) -> Result<String, ApiError> {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri.to_string());
        }
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("missing Host header".into()))?;
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        Ok(format!("{}://{}{}", self.scheme, host, path))
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("mode", &self.mode)
            .field("allow_mismatch", &self.allow_mismatch)
            .field("discovery_fail_open", &self.discovery_fail_open)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Buffer the body, resolve the peer and attach it to the request
pub async fn verify_signature(
    State(verifier): State<Arc<SignatureVerifier>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if verifier.mode == SignatureMode::Off {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, verifier.max_body_bytes)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(verifier.max_body_bytes))?;

    if let Some(identity) = verifier
        .resolve(&parts.method, &parts.uri, &parts.headers, &bytes)
        .await?
    {
        parts.extensions.insert(identity);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Reject peers the policy engine denies
///
/// Requires [`verify_signature`] to have run first.
pub async fn enforce_policy(
    State(engine): State<Arc<PolicyEngine>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let decision = match request.extensions().get::<PeerIdentity>() {
        Some(identity) => engine.evaluate(identity.authority_for_compare.as_str(), identity.authenticated),
        None => engine.evaluate_unidentified().ok_or(ApiError::MissingPeer)?,
    };
    if !decision.allowed {
        return Err(ApiError::PolicyDenied(decision.reason));
    }

    request.extensions_mut().insert(decision);
    Ok(next.run(request).await)
}
