//! Shared data types

use serde::{Deserialize, Serialize};

use crate::authority::Authority;

/// One server entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryServer {
    pub url: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

/// A directory service's member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    /// Federation name published by the directory service
    pub federation: String,
    pub servers: Vec<DirectoryServer>,
    /// True only if a configured key validated the document's signature
    pub verified: bool,
}

/// The peer a request is attributed to
///
/// Built once per inbound request by the signature middleware and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerIdentity {
    /// Authority as asserted by the verified key ID or declared in the body
    pub authority: String,
    /// Normalized form used for every comparison
    pub authority_for_compare: Authority,
    /// Whether a signature proved the authority
    pub authenticated: bool,
    /// Key that signed the request, when authenticated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl PeerIdentity {
    pub fn authenticated(
        authority: impl Into<String>,
        authority_for_compare: Authority,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            authority_for_compare,
            authenticated: true,
            key_id: Some(key_id.into()),
        }
    }

    pub fn declared(authority: impl Into<String>, authority_for_compare: Authority) -> Self {
        Self {
            authority: authority.into(),
            authority_for_compare,
            authenticated: false,
            key_id: None,
        }
    }
}
