//! # OCM Trust Directory
//!
//! Outbound collaborators of the federation trust core.
//!
//! ## Architecture
//!
//! - **HttpClient**: narrow GET contract; `ReqwestHttpClient` is the default
//!   implementation with a timeout, bounded redirects and a size cap
//! - **DirectoryClient**: fetches a directory service listing, verifies its
//!   JWS signature against configured keys and parses the strict schema
//! - **PeerDiscovery**: answers "does this peer sign?" and "which key is
//!   this key ID?"; `OcmDiscoveryClient` reads `/.well-known/ocm` with a
//!   TTL cache
//! - **mock**: in-memory implementations of both contracts for tests
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ocm_trust_directory::{DirectoryClient, ReqwestHttpClient, VerificationPolicy};
//!
//! let http = Arc::new(ReqwestHttpClient::new(Duration::from_secs(10))?);
//! let client = DirectoryClient::new(http);
//! let listing = client
//!     .fetch_listing("https://dir.example.org/listing", &keys, VerificationPolicy::Required)
//!     .await?;
//! println!("{} servers, verified: {}", listing.servers.len(), listing.verified);
//! ```

pub mod discovery;
pub mod error;
pub mod http;
pub mod listing;
pub mod mock;

pub use discovery::{DiscoveryDocument, OcmDiscoveryClient, PeerDiscovery, PublishedKey};
pub use error::{DirectoryError, Result};
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use listing::{DirectoryClient, VerificationPolicy};
