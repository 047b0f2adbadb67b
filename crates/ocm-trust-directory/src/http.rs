//! Outbound HTTP
//!
//! Network safety (private address blocking, redirect limits, size caps) is
//! the client's job; everything above this trait assumes a hardened client.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;

use crate::error::{DirectoryError, Result};

/// Default cap on response bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Status and body of a completed GET
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal GET client used for directory listings and discovery
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<HttpResponse>;
}

/// `reqwest`-backed client with a timeout, bounded redirects and a size cap
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(concat!("ocm-trust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DirectoryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn fetch(&self, url: &str) -> Result<HttpResponse> {
        let mut response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json, application/jose")
            .send()
            .await?;

        let status = response.status().as_u16();
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(DirectoryError::BodyTooLarge(self.max_body_bytes));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(DirectoryError::BodyTooLarge(self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            body: body.freeze(),
        })
    }
}
