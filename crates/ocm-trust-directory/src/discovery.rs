//! Peer discovery
//!
//! Resolves what a remote OCM server advertises at `/.well-known/ocm`:
//! whether it signs its requests, and which public key belongs to a key ID.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use ocm_trust_core::authority::{key_id_authority, normalize};

use crate::error::{DirectoryError, Result};
use crate::http::HttpClient;

/// Capability string advertised by servers that sign their requests
pub const HTTP_SIG_CAPABILITY: &str = "http-sig";

/// Path of the discovery document
pub const WELL_KNOWN_PATH: &str = "/.well-known/ocm";

/// Public key entry of a discovery document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    pub key_id: String,
    pub public_key_pem: String,
}

/// The parts of an OCM discovery document this crate reads and publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub end_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublishedKey>,
}

impl DiscoveryDocument {
    /// A server that publishes a key or the `http-sig` capability signs its requests
    pub fn is_signing_capable(&self) -> bool {
        self.public_key.is_some()
            || self
                .capabilities
                .iter()
                .any(|c| c.trim_start_matches('/') == HTTP_SIG_CAPABILITY)
    }
}

/// What the signature middleware needs to know about remote peers
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// Whether the peer at `authority` advertises request signing
    async fn is_signing_capable(&self, authority: &str) -> Result<bool>;

    /// PEM public key published for `key_id`
    async fn public_key(&self, key_id: &str) -> Result<String>;
}

/// Discovery over HTTP with a TTL cache of fetched documents
pub struct OcmDiscoveryClient {
    http: Arc<dyn HttpClient>,
    scheme: String,
    cache: Cache<String, Arc<DiscoveryDocument>>,
}

impl OcmDiscoveryClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            scheme: "https".to_string(),
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(10_000)
                .build(),
        }
    }

    /// Scheme used for bare authorities (default `https`)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    async fn document(&self, scheme: &str, authority: &str) -> Result<Arc<DiscoveryDocument>> {
        let authority = normalize(authority, scheme)?;
        let base = format!("{}://{}", scheme, authority);

        if let Some(cached) = self.cache.get(&base).await {
            debug!(peer = %base, "Using cached discovery document");
            return Ok(cached);
        }

        let url = format!("{}{}", base, WELL_KNOWN_PATH);
        debug!(url = %url, "Fetching discovery document");
        let response = self.http.fetch(&url).await?;
        if !response.is_success() {
            return Err(DirectoryError::Status(response.status));
        }

        let document: DiscoveryDocument = serde_json::from_slice(&response.body)
            .map_err(|e| DirectoryError::Discovery(format!("invalid discovery document: {}", e)))?;
        let document = Arc::new(document);

        self.cache.insert(base, document.clone()).await;
        Ok(document)
    }
}

#[async_trait]
impl PeerDiscovery for OcmDiscoveryClient {
    async fn is_signing_capable(&self, authority: &str) -> Result<bool> {
        let document = self.document(&self.scheme, authority).await?;
        Ok(document.is_signing_capable())
    }

    async fn public_key(&self, key_id: &str) -> Result<String> {
        let asserted = key_id_authority(key_id)?;
        let document = self.document(&asserted.scheme, &asserted.raw).await?;

        match &document.public_key {
            Some(published) if published.key_id == key_id => Ok(published.public_key_pem.clone()),
            Some(published) => Err(DirectoryError::Discovery(format!(
                "peer publishes key {} not {}",
                published.key_id, key_id
            ))),
            None => Err(DirectoryError::Discovery("peer publishes no public key".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::StaticHttpClient;

    const DOC: &str = r#"{
        "enabled": true,
        "apiVersion": "1.2.0",
        "endPoint": "https://sender.example.com/ocm",
        "capabilities": ["/invite-accepted"],
        "publicKey": {"keyId": "https://sender.example.com/ocm#key-1", "publicKeyPem": "PEM"}
    }"#;

    fn client_with(url: &str, body: &str) -> (Arc<StaticHttpClient>, OcmDiscoveryClient) {
        let http = Arc::new(StaticHttpClient::new().with_response(url, 200, body));
        let client = OcmDiscoveryClient::new(http.clone());
        (http, client)
    }

    #[tokio::test]
    async fn test_public_key_resolution() {
        let (_, client) = client_with("https://sender.example.com/.well-known/ocm", DOC);
        let pem = client.public_key("https://sender.example.com/ocm#key-1").await.unwrap();
        assert_eq!(pem, "PEM");
    }

    #[tokio::test]
    async fn test_default_port_in_key_id_reaches_same_document() {
        let (_, client) = client_with("https://sender.example.com/.well-known/ocm", DOC);
        // Key ID must still match exactly
        let err = client
            .public_key("https://sender.example.com:443/ocm#key-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_signing_capability() {
        let (_, client) = client_with("https://sender.example.com/.well-known/ocm", DOC);
        assert!(client.is_signing_capable("Sender.Example.com:443").await.unwrap());

        let (_, plain) = client_with(
            "https://plain.example.com/.well-known/ocm",
            r#"{"enabled": true, "capabilities": []}"#,
        );
        assert!(!plain.is_signing_capable("plain.example.com").await.unwrap());

        let (_, flagged) = client_with(
            "https://flagged.example.com/.well-known/ocm",
            r#"{"enabled": true, "capabilities": ["http-sig"]}"#,
        );
        assert!(flagged.is_signing_capable("flagged.example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_documents_are_cached() {
        let url = "https://sender.example.com/.well-known/ocm";
        let (http, client) = client_with(url, DOC);

        client.is_signing_capable("sender.example.com").await.unwrap();
        client.is_signing_capable("SENDER.example.com").await.unwrap();
        client.public_key("https://sender.example.com/ocm#key-1").await.unwrap();

        assert_eq!(http.call_count(url), 1);
    }

    #[tokio::test]
    async fn test_discovery_failures() {
        let http = Arc::new(StaticHttpClient::new());
        let client = OcmDiscoveryClient::new(http);
        assert!(client.is_signing_capable("down.example.com").await.is_err());
        assert!(client.is_signing_capable("https://bad").await.is_err());
    }
}
