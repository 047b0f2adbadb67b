//! Property-Based Tests for authority normalization and request signatures
//!
//! These tests verify the comparison primitive every trust decision uses:
//! 1. Default ports are equivalent to no port, per scheme
//! 2. Hostname case never matters
//! 3. Schemes and paths are always rejected
//! 4. Any single-byte change to a request signature is rejected

use http::HeaderMap;
use ocm_trust_core::httpsig::{self, HttpSignature, MessageComponents, VerifyOptions};
use ocm_trust_core::{normalize, SignatureAlgorithm, SigningKeyManager};
use proptest::prelude::*;

fn host_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,15}(\\.[a-zA-Z][a-zA-Z0-9-]{0,15}){0,3}"
}

// =============================================================================
// Normalization
// =============================================================================

proptest! {
    #[test]
    fn prop_https_default_port_is_elided(host in host_strategy()) {
        prop_assert_eq!(
            normalize(&host, "https").unwrap(),
            normalize(&format!("{}:443", host), "https").unwrap()
        );
    }

    #[test]
    fn prop_http_default_port_is_elided(host in host_strategy()) {
        prop_assert_eq!(
            normalize(&host, "http").unwrap(),
            normalize(&format!("{}:80", host), "http").unwrap()
        );
    }

    #[test]
    fn prop_case_does_not_matter(host in host_strategy()) {
        prop_assert_eq!(
            normalize(&host.to_uppercase(), "https").unwrap(),
            normalize(&host.to_lowercase(), "https").unwrap()
        );
    }

    #[test]
    fn prop_non_default_ports_are_kept(host in host_strategy(), port in 1u16..=65535) {
        prop_assume!(port != 443);
        let normalized = normalize(&format!("{}:{}", host, port), "https").unwrap();
        let expected_suffix = format!(":{}", port);
        prop_assert!(normalized.as_str().ends_with(&expected_suffix));
    }

    #[test]
    fn prop_normalization_is_idempotent(host in host_strategy(), port in proptest::option::of(1u16..=65535)) {
        let input = match port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };
        let once = normalize(&input, "https").unwrap();
        let twice = normalize(once.as_str(), "https").unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_schemes_and_paths_are_rejected(host in host_strategy(), path in "[a-z]{0,8}") {
        let with_scheme = format!("https://{}", host);
        let with_path = format!("{}/{}", host, path);
        prop_assert!(normalize(&with_scheme, "https").is_err());
        prop_assert!(normalize(&with_path, "https").is_err());
    }
}

#[test]
fn test_required_rejections() {
    assert!(normalize("https://x", "https").is_err());
    assert!(normalize("a/b", "https").is_err());
    assert!(normalize("", "https").is_err());
}

// =============================================================================
// Signatures
// =============================================================================

const NOW: i64 = 1_760_000_000;
const URI: &str = "https://receiver.example.org/ocm/shares";

fn signed_request(signer: &SigningKeyManager, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    httpsig::sign_request("POST", URI, &mut headers, body, signer, NOW).unwrap();
    headers
}

fn verify(headers: &HeaderMap, signature: &HttpSignature, pem: &str) -> bool {
    let message = MessageComponents {
        method: "POST",
        target_uri: URI,
        headers,
    };
    signature
        .verify(&message, pem, SignatureAlgorithm::Ed25519, &VerifyOptions::at(NOW))
        .is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_flipped_signature_byte_is_rejected(index in 0usize..64, mask in 1u8..=255) {
        let signer = SigningKeyManager::new("https://sender.example.com", None).unwrap();
        signer.load_or_generate().unwrap();
        let pem = signer.public_key_pem().unwrap();
        let headers = signed_request(&signer, b"{\"a\":1}");

        let mut signature = HttpSignature::from_headers(&headers).unwrap().unwrap();
        prop_assert!(verify(&headers, &signature, &pem));

        signature.signature[index] ^= mask;
        prop_assert!(!verify(&headers, &signature, &pem));
    }
}
