//! # OCM Trust Core
//!
//! Primitives every federation trust decision is built on.
//!
//! ## Key Concepts
//!
//! - **Authority**: a normalized `host[:port]`; the only way peers are compared
//! - **Signing key**: this server's Ed25519 key and its key ID
//!   (`scheme://host[:port]/ocm#key-1`)
//! - **Verification key**: a configured third-party public key
//! - **JWS envelope**: a signed directory listing in compact, flattened or
//!   general serialization
//! - **HTTP message signature**: a detached request signature (RFC 9421)
//!   bound to the body through `Content-Digest`

pub mod authority;
pub mod crypto;
pub mod error;
pub mod httpsig;
pub mod jws;
pub mod types;

pub use authority::{normalize, Authority};
pub use crypto::{SignatureAlgorithm, SigningKeyManager, VerificationKey};
pub use error::{Result, TrustError};
pub use httpsig::{HttpSignature, MessageComponents, VerifyOptions};
pub use jws::{JwsEnvelope, VerifiedPayload};
pub use types::{DirectoryListing, DirectoryServer, PeerIdentity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
