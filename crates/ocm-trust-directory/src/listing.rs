//! Directory Service Client
//!
//! Fetches a directory service's member list, verifies its JWS signature
//! against the trust group's configured keys, and parses the strict schema:
//!
//! ```json
//! {"federation": "name", "servers": [{"url": "https://host", "displayName": "Host"}]}
//! ```
//!
//! Verified listings are filtered down to bare authority URLs. Unverified
//! listings are returned as published.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use ocm_trust_core::authority::is_bare_authority_url;
use ocm_trust_core::{
    DirectoryListing, DirectoryServer, JwsEnvelope, SignatureAlgorithm, VerificationKey,
};

use crate::error::{DirectoryError, Result};
use crate::http::HttpClient;

/// How strictly a listing's signature is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Only a verified listing is usable
    Required,
    /// Verify when possible, otherwise use the listing unverified
    Optional,
    /// Never verify
    Off,
}

impl fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationPolicy::Required => "required",
            VerificationPolicy::Optional => "optional",
            VerificationPolicy::Off => "off",
        })
    }
}

impl FromStr for VerificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(VerificationPolicy::Required),
            "optional" => Ok(VerificationPolicy::Optional),
            "off" => Ok(VerificationPolicy::Off),
            other => Err(format!("unknown verification policy: {}", other)),
        }
    }
}

#[derive(Deserialize)]
struct ListingDocument {
    federation: String,
    servers: Vec<DirectoryServer>,
}

/// Fetches and verifies directory listings
#[derive(Clone)]
pub struct DirectoryClient {
    http: Arc<dyn HttpClient>,
}

impl DirectoryClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Fetch `url` and produce a listing according to `policy`
    ///
    /// Every failure is returned; there is no fallback to an empty listing.
    pub async fn fetch_listing(
        &self,
        url: &str,
        keys: &[VerificationKey],
        policy: VerificationPolicy,
    ) -> Result<DirectoryListing> {
        let response = self.http.fetch(url).await?;
        if !response.is_success() {
            return Err(DirectoryError::Status(response.status));
        }

        let algorithms: HashSet<SignatureAlgorithm> =
            keys.iter().filter(|k| k.active).map(|k| k.algorithm).collect();
        if algorithms.is_empty() {
            let unusable = match policy {
                VerificationPolicy::Required => true,
                VerificationPolicy::Optional => !keys.is_empty(),
                VerificationPolicy::Off => false,
            };
            if unusable {
                return Err(DirectoryError::NoActiveKeys);
            }
        }
        debug!(url = %url, policy = %policy, algorithms = ?algorithms, "Fetched directory listing");

        let (payload, verified) = match JwsEnvelope::parse(&response.body) {
            Err(e) => {
                if policy == VerificationPolicy::Required {
                    return Err(DirectoryError::EnvelopeRequired(e.to_string()));
                }
                debug!(url = %url, "Listing is not a signature envelope, using it unverified");
                (response.body.to_vec(), false)
            }
            Ok(envelope) if policy == VerificationPolicy::Off => (decode_payload(&envelope)?, false),
            Ok(envelope) => match envelope.verify(keys) {
                Ok(verified) => {
                    debug!(url = %url, key_id = %verified.key_id, "Listing signature verified");
                    (verified.payload, true)
                }
                Err(e) if policy == VerificationPolicy::Required => {
                    warn!(url = %url, error = %e, "Listing signature rejected");
                    return Err(DirectoryError::SignatureVerification(e.to_string()));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Listing signature not verified, using it unverified");
                    (decode_payload(&envelope)?, false)
                }
            },
        };

        let document = parse_document(&payload)?;

        let servers = if verified {
            let (kept, dropped): (Vec<_>, Vec<_>) = document
                .servers
                .into_iter()
                .partition(|s| is_bare_authority_url(&s.url));
            if !dropped.is_empty() {
                debug!(url = %url, dropped = dropped.len(), "Dropped non-authority server URLs from verified listing");
            }
            kept
        } else {
            document.servers
        };

        Ok(DirectoryListing {
            federation: document.federation,
            servers,
            verified,
        })
    }
}

fn decode_payload(envelope: &JwsEnvelope) -> Result<Vec<u8>> {
    envelope
        .unverified_payload()
        .map_err(|e| DirectoryError::Schema(e.to_string()))
}

fn parse_document(payload: &[u8]) -> Result<ListingDocument> {
    let document: ListingDocument =
        serde_json::from_slice(payload).map_err(|e| DirectoryError::Schema(e.to_string()))?;

    if document.federation.trim().is_empty() {
        return Err(DirectoryError::Schema("federation must not be empty".into()));
    }
    if document.servers.iter().any(|s| s.url.trim().is_empty()) {
        return Err(DirectoryError::Schema("server url must not be empty".into()));
    }
    Ok(document)
}
