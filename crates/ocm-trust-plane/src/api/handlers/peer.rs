//! Peer identity echo
//!
//! Runs behind the signature middleware and the policy gate, so reaching
//! this handler means the peer was allowed. The peer is absent only when
//! signatures are off or no peer was declared, with the policy disabled.

use axum::{body::Bytes, Extension, Json};
use serde::Serialize;

use ocm_trust_core::PeerIdentity;

use crate::policy::PolicyDecision;

#[derive(Debug, Serialize)]
pub struct PeerResponse {
    pub peer: Option<PeerIdentity>,
    pub decision: PolicyDecision,
    /// Size of the body as seen downstream of the middleware
    pub body_bytes: usize,
}

/// POST /ocm/peer
pub async fn peer_identity(
    peer: Option<Extension<PeerIdentity>>,
    Extension(decision): Extension<PolicyDecision>,
    body: Bytes,
) -> Json<PeerResponse> {
    Json(PeerResponse {
        peer: peer.map(|Extension(peer)| peer),
        decision,
        body_bytes: body.len(),
    })
}
