//! OCM Trust Plane
//!
//! Decides, for every inbound federated request, whether the sender is an
//! acceptable peer:
//! - Verifies RFC 9421 request signatures and `Content-Digest`
//! - Resolves a `PeerIdentity` (authenticated or declared) per request
//! - Evaluates allow/deny/exempt lists and trust-group membership
//! - Keeps trust-group membership cached and refreshed in the background
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with key info
//! - `GET /.well-known/ocm` - This server's discovery document and public key
//! - `GET /v1/federation/directory` - Cached directory listings of enabled trust groups
//! - `POST /ocm/peer` - Resolve and authorize the calling peer

pub mod api;
pub mod config;
pub mod policy;
pub mod trust;

pub use api::create_router;
pub use api::error::ApiError;
pub use api::handlers::{AppState, PlaneConfig};
pub use api::middleware::{ocm_declared_peer, SignatureMode, SignatureVerifier};
pub use config::{ConfigError, ServerConfig};
pub use policy::{PolicyConfig, PolicyDecision, PolicyEngine, ReasonCode};
pub use trust::{ManagerSettings, TrustGroupConfig, TrustGroupManager};
