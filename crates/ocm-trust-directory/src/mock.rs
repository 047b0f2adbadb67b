//! In-memory collaborators
//!
//! For testing purposes - serve canned HTTP responses and discovery answers
//! without touching the network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

use ocm_trust_core::normalize;

use crate::discovery::PeerDiscovery;
use crate::error::{DirectoryError, Result};
use crate::http::{HttpClient, HttpResponse};

/// HTTP client answering from a URL → response table
///
/// Unknown URLs fail with a network error. Every call is counted.
#[derive(Debug, Default)]
pub struct StaticHttpClient {
    responses: RwLock<HashMap<String, HttpResponse>>,
    calls: RwLock<HashMap<String, usize>>,
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, url: &str, status: u16, body: impl Into<String>) -> Self {
        self.set_response(url, status, body);
        self
    }

    pub fn set_response(&self, url: &str, status: u16, body: impl Into<String>) {
        self.responses.write().insert(
            url.to_string(),
            HttpResponse {
                status,
                body: Bytes::from(body.into()),
            },
        );
    }

    /// Make `url` fail with a network error from now on
    pub fn remove_response(&self, url: &str) {
        self.responses.write().remove(url);
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.read().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn fetch(&self, url: &str) -> Result<HttpResponse> {
        *self.calls.write().entry(url.to_string()).or_default() += 1;
        self.responses
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| DirectoryError::Network(format!("connection refused: {}", url)))
    }
}

/// Peer discovery answering from in-memory tables
///
/// Authorities are stored normalized under `https`.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    signing_capable: RwLock<HashMap<String, bool>>,
    keys: RwLock<HashMap<String, String>>,
    failing: bool,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery that fails every lookup
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_key(self, key_id: impl Into<String>, public_key_pem: impl Into<String>) -> Self {
        self.keys.write().insert(key_id.into(), public_key_pem.into());
        self
    }

    pub fn with_signing_capable(self, authority: &str, capable: bool) -> Self {
        self.signing_capable.write().insert(lookup_key(authority), capable);
        self
    }
}

fn lookup_key(authority: &str) -> String {
    normalize(authority, "https")
        .map(|a| a.into_string())
        .unwrap_or_else(|_| authority.to_ascii_lowercase())
}

#[async_trait]
impl PeerDiscovery for StaticDiscovery {
    async fn is_signing_capable(&self, authority: &str) -> Result<bool> {
        if self.failing {
            return Err(DirectoryError::Discovery("discovery unavailable".into()));
        }
        Ok(self
            .signing_capable
            .read()
            .get(&lookup_key(authority))
            .copied()
            .unwrap_or(false))
    }

    async fn public_key(&self, key_id: &str) -> Result<String> {
        if self.failing {
            return Err(DirectoryError::Discovery("discovery unavailable".into()));
        }
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| DirectoryError::Discovery(format!("unknown key {}", key_id)))
    }
}
