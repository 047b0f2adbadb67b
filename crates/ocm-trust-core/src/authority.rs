//! Authority normalization
//!
//! An authority is the `host[:port]` part of a peer's origin. Every trust
//! decision in this workspace compares peers by their normalized authority,
//! and this module is the only place that knows about default ports.
//!
//! Normalization rules:
//! - input must be a schemeless `host[:port]` (no `://`, no `/`, no userinfo,
//!   no query or fragment, no whitespace)
//! - the hostname is lowercased
//! - a port equal to the scheme's default (443 for https, 80 for http) is
//!   dropped, every other port is kept verbatim
//! - IPv6 literals must be bracketed and are always emitted bracketed

use serde::Serialize;
use std::fmt;
use std::net::Ipv6Addr;
use url::Url;

use crate::error::{Result, TrustError};

/// A normalized `host[:port]`
///
/// Two authorities identify the same peer iff they are equal. There is no
/// `Deserialize` impl: the only way to obtain one is through [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Authority(String);

impl Authority {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Authority {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Default port for a URL scheme, if it has one
fn default_port(scheme: &str) -> Option<u16> {
    match scheme.to_ascii_lowercase().as_str() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    }
}

/// Normalize a schemeless authority for comparison under `scheme`
pub fn normalize(authority: &str, scheme: &str) -> Result<Authority> {
    if authority.is_empty() {
        return Err(TrustError::invalid_authority(authority, "empty authority"));
    }
    if authority.contains("://") {
        return Err(TrustError::invalid_authority(authority, "authority must not carry a scheme"));
    }
    if authority.contains('/') {
        return Err(TrustError::invalid_authority(authority, "authority must not carry a path"));
    }
    if authority.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TrustError::invalid_authority(authority, "authority contains whitespace"));
    }
    if authority.contains(['@', '?', '#']) {
        return Err(TrustError::invalid_authority(authority, "authority must be host[:port] only"));
    }

    let (host, port, bracketed) = split_host_port(authority)?;

    let port = match port {
        Some(raw) => {
            let value = parse_port(authority, raw)?;
            if default_port(scheme) == Some(value) {
                None
            } else {
                Some(raw)
            }
        }
        None => None,
    };

    let host = host.to_ascii_lowercase();
    let normalized = match (bracketed, port) {
        (true, Some(port)) => format!("[{}]:{}", host, port),
        (true, None) => format!("[{}]", host),
        (false, Some(port)) => format!("{}:{}", host, port),
        (false, None) => host,
    };

    Ok(Authority(normalized))
}

/// Split into (host without brackets, raw port, was-bracketed)
fn split_host_port(authority: &str) -> Result<(&str, Option<&str>, bool)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| TrustError::invalid_authority(authority, "unterminated IPv6 literal"))?;
        let host = &rest[..end];
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(TrustError::invalid_authority(authority, "invalid IPv6 literal"));
        }
        let tail = &rest[end + 1..];
        if tail.is_empty() {
            return Ok((host, None, true));
        }
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| TrustError::invalid_authority(authority, "unexpected data after IPv6 literal"))?;
        return Ok((host, Some(port), true));
    }

    if authority.contains([']', '[']) {
        return Err(TrustError::invalid_authority(authority, "stray bracket"));
    }

    let (host, port) = match authority.matches(':').count() {
        0 => (authority, None),
        1 => {
            let (host, port) = authority.split_once(':').unwrap_or((authority, ""));
            (host, Some(port))
        }
        _ => {
            return Err(TrustError::invalid_authority(authority, "IPv6 literals must be bracketed"));
        }
    };

    if host.is_empty() {
        return Err(TrustError::invalid_authority(authority, "empty host"));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(TrustError::invalid_authority(authority, "invalid host characters"));
    }

    Ok((host, port, false))
}

fn parse_port(authority: &str, port: &str) -> Result<u16> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TrustError::invalid_authority(authority, "port must be numeric"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(TrustError::invalid_authority(authority, "port out of range")),
        Ok(p) => Ok(p),
    }
}

/// An absolute URL together with its authority exactly as written
///
/// `url::Url` normalizes the host and drops default ports on its own; trust
/// comparisons need the raw authority so that [`normalize`] stays the only
/// place applying default-port rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts<'a> {
    /// Parsed URL
    pub parsed: Url,
    /// Raw authority, exactly as it appears in the URL
    pub authority: &'a str,
}

impl UrlParts<'_> {
    /// Lowercased scheme
    pub fn scheme(&self) -> &str {
        self.parsed.scheme()
    }

    fn has_userinfo(&self) -> bool {
        !self.parsed.username().is_empty() || self.parsed.password().is_some()
    }
}

/// Parse an absolute URL and slice out its raw authority
pub fn split_url(url: &str) -> Result<UrlParts<'_>> {
    let parsed = Url::parse(url).map_err(|_| TrustError::InvalidUrl(url.to_string()))?;
    if parsed.cannot_be_a_base() || parsed.host().is_none() {
        return Err(TrustError::InvalidUrl(url.to_string()));
    }

    let (_, rest) = url
        .split_once("://")
        .ok_or_else(|| TrustError::InvalidUrl(url.to_string()))?;
    let end = rest.find(['/', '?', '#', '\\']).unwrap_or(rest.len());
    let authority = &rest[..end];
    if authority.is_empty() {
        return Err(TrustError::InvalidUrl(url.to_string()));
    }

    Ok(UrlParts { parsed, authority })
}

/// Normalized authority of an absolute URL, using the URL's own scheme
///
/// URLs carrying userinfo are rejected.
pub fn authority_from_url(url: &str) -> Result<Authority> {
    let parts = split_url(url)?;
    if parts.has_userinfo() {
        return Err(TrustError::InvalidUrl(url.to_string()));
    }
    normalize(parts.authority, parts.scheme())
}

/// True for `scheme://host[:port]` with at most a trailing slash
///
/// Userinfo, path segments, query strings and fragments all disqualify.
pub fn is_bare_authority_url(url: &str) -> bool {
    let Ok(parts) = split_url(url) else {
        return false;
    };
    let parsed = &parts.parsed;
    matches!(parsed.scheme(), "http" | "https")
        && !parts.has_userinfo()
        && parsed.path() == "/"
        && parsed.query().is_none()
        && parsed.fragment().is_none()
        && normalize(parts.authority, parsed.scheme()).is_ok()
}

/// Authority asserted by a signing key ID such as `https://host:443/ocm#key-1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIdAuthority {
    /// Scheme of the key ID URI
    pub scheme: String,
    /// Authority exactly as written in the key ID
    pub raw: String,
    /// Authority normalized under `scheme`
    pub normalized: Authority,
}

/// Extract the asserted authority from a key ID URI
pub fn key_id_authority(key_id: &str) -> Result<KeyIdAuthority> {
    let parts = split_url(key_id)?;
    let normalized = normalize(parts.authority, parts.scheme())?;
    Ok(KeyIdAuthority {
        raw: parts.authority.to_string(),
        scheme: parts.scheme().to_string(),
        normalized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_host() {
        assert_eq!(normalize("Example.COM", "https").unwrap().as_str(), "example.com");
    }

    #[test]
    fn test_strips_default_ports() {
        assert_eq!(normalize("example.com:443", "https").unwrap().as_str(), "example.com");
        assert_eq!(normalize("example.com:80", "http").unwrap().as_str(), "example.com");
    }

    #[test]
    fn test_keeps_non_default_ports() {
        assert_eq!(normalize("example.com:80", "https").unwrap().as_str(), "example.com:80");
        assert_eq!(normalize("example.com:443", "http").unwrap().as_str(), "example.com:443");
        assert_eq!(normalize("example.com:9200", "https").unwrap().as_str(), "example.com:9200");
    }

    #[test]
    fn test_unknown_scheme_keeps_every_port() {
        assert_eq!(normalize("example.com:443", "ftp").unwrap().as_str(), "example.com:443");
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert_eq!(normalize("example.com:443", "HTTPS").unwrap().as_str(), "example.com");
    }

    #[test]
    fn test_ipv6() {
        assert_eq!(normalize("[::1]", "https").unwrap().as_str(), "[::1]");
        assert_eq!(normalize("[::1]:443", "https").unwrap().as_str(), "[::1]");
        assert_eq!(normalize("[::1]:9200", "https").unwrap().as_str(), "[::1]:9200");
        assert_eq!(normalize("[FE80::1]", "https").unwrap().as_str(), "[fe80::1]");
    }

    #[test]
    fn test_rejects_malformed() {
        for input in [
            "",
            "https://example.com",
            "example.com/path",
            "a/b",
            "user@example.com",
            "example.com?x=1",
            "example.com:",
            ":443",
            "example.com:abc",
            "example.com:70000",
            "example.com:0",
            "::1",
            "[::1",
            "[not-ipv6]",
            "[::1]x",
            "exa mple.com",
        ] {
            assert!(normalize(input, "https").is_err(), "expected rejection of {:?}", input);
        }
    }

    #[test]
    fn test_split_url() {
        let parts = split_url("HTTPS://Example.com:8443/ocm?x#y").unwrap();
        assert_eq!(parts.scheme(), "https");
        assert_eq!(parts.authority, "Example.com:8443");
        assert_eq!(parts.parsed.path(), "/ocm");
        assert_eq!(parts.parsed.query(), Some("x"));

        assert!(split_url("example.com").is_err());
        assert!(split_url("https:///path").is_err());
    }

    #[test]
    fn test_bare_authority_urls() {
        assert!(is_bare_authority_url("https://a.example.com"));
        assert!(is_bare_authority_url("https://a.example.com/"));
        assert!(is_bare_authority_url("http://a.example.com:8080"));

        assert!(!is_bare_authority_url("https://a.example.com/path"));
        assert!(!is_bare_authority_url("https://a.example.com//"));
        assert!(!is_bare_authority_url("https://user@a.example.com"));
        assert!(!is_bare_authority_url("https://a.example.com?q=1"));
        assert!(!is_bare_authority_url("https://a.example.com#frag"));
        assert!(!is_bare_authority_url("ftp://a.example.com"));
        assert!(!is_bare_authority_url("a.example.com"));
        assert!(!is_bare_authority_url("https://a.example.com?"));
        assert!(!is_bare_authority_url("https://:pw@a.example.com"));
    }

    #[test]
    fn test_authority_from_url() {
        assert_eq!(
            authority_from_url("https://Peer.Example.com:443/remote.php").unwrap().as_str(),
            "peer.example.com"
        );
        assert_eq!(authority_from_url("http://[::1]:80").unwrap().as_str(), "[::1]");
        assert!(authority_from_url("https://user@peer.example.com").is_err());
        assert!(authority_from_url("peer.example.com").is_err());
    }

    #[test]
    fn test_key_id_authority() {
        let parsed = key_id_authority("https://Cloud.Example.com:443/ocm#key-1").unwrap();
        assert_eq!(parsed.scheme, "https");
        assert_eq!(parsed.raw, "Cloud.Example.com:443");
        assert_eq!(parsed.normalized.as_str(), "cloud.example.com");
    }
}
