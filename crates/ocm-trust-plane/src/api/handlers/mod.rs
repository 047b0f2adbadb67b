//! API request handlers

pub mod discovery;
pub mod federation;
pub mod peer;

use std::sync::Arc;

use ocm_trust_core::SigningKeyManager;

use crate::api::middleware::SignatureVerifier;
use crate::policy::PolicyEngine;
use crate::trust::TrustGroupManager;

pub use discovery::{well_known, OCM_API_VERSION};
pub use federation::{directory_listings, DirectoryResponse};
pub use peer::{peer_identity, PeerResponse};

/// Trust plane configuration
#[derive(Debug, Clone)]
pub struct PlaneConfig {
    /// Public origin of this server, e.g. `https://cloud.example.org`
    pub public_origin: String,
    /// Provider name published in the discovery document
    pub provider: String,
}

impl PlaneConfig {
    pub fn new(public_origin: impl Into<String>) -> Self {
        Self {
            public_origin: public_origin.into().trim_end_matches('/').to_string(),
            provider: "ocm-trust-plane".to_string(),
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// This server's signing key
    pub signer: Arc<SigningKeyManager>,
    /// Trust groups and their membership caches
    pub trust_groups: TrustGroupManager,
    /// Peer policy
    pub policy: Arc<PolicyEngine>,
    /// Inbound signature verification
    pub verifier: Arc<SignatureVerifier>,
    pub config: PlaneConfig,
}
