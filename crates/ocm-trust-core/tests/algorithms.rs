//! Non-Ed25519 verification keys
//!
//! Directory services sign listings with ES256, RS256 or PS512 as well as
//! EdDSA. The fixtures are fixed P-256 and RSA-2048 keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, EncodingKey};

use ocm_trust_core::jws::JwsSerialization;
use ocm_trust_core::{JwsEnvelope, SignatureAlgorithm, VerificationKey};

const P256_PRIVATE: &str = include_str!("fixtures/p256_private.pem");
const P256_PUBLIC: &str = include_str!("fixtures/p256_public.pem");
const RSA_PRIVATE: &str = include_str!("fixtures/rsa_private.pem");
const RSA_PUBLIC: &str = include_str!("fixtures/rsa_public.pem");

const LISTING: &str =
    r#"{"federation":"f","servers":[{"url":"https://a.example.com","displayName":"A"}]}"#;

fn encoding_key(algorithm: SignatureAlgorithm) -> EncodingKey {
    match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => EncodingKey::from_ec_pem(P256_PRIVATE.as_bytes()).unwrap(),
        SignatureAlgorithm::RsaPkcs1Sha256 | SignatureAlgorithm::RsaPssSha512 => {
            EncodingKey::from_rsa_pem(RSA_PRIVATE.as_bytes()).unwrap()
        }
        SignatureAlgorithm::Ed25519 => unreachable!("Ed25519 is covered by the signing key manager"),
    }
}

fn jwt_algorithm(algorithm: SignatureAlgorithm) -> Algorithm {
    match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => Algorithm::ES256,
        SignatureAlgorithm::RsaPkcs1Sha256 => Algorithm::RS256,
        SignatureAlgorithm::RsaPssSha512 => Algorithm::PS512,
        SignatureAlgorithm::Ed25519 => Algorithm::EdDSA,
    }
}

fn public_pem(algorithm: SignatureAlgorithm) -> &'static str {
    match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => P256_PUBLIC,
        _ => RSA_PUBLIC,
    }
}

fn verification_key(key_id: &str, algorithm: SignatureAlgorithm) -> VerificationKey {
    VerificationKey::new(key_id, public_pem(algorithm), algorithm)
}

/// Protected header and base64url signature over `payload`
fn sign_slot(payload_b64: &str, key_id: &str, algorithm: SignatureAlgorithm) -> (String, String) {
    let header = serde_json::json!({"alg": algorithm.jws_name(), "kid": key_id});
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
    let signing_input = format!("{}.{}", protected, payload_b64);
    let signature = jsonwebtoken::crypto::sign(
        signing_input.as_bytes(),
        &encoding_key(algorithm),
        jwt_algorithm(algorithm),
    )
    .unwrap();
    (protected, signature)
}

fn compact(payload: &str, key_id: &str, algorithm: SignatureAlgorithm) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let (protected, signature) = sign_slot(&payload_b64, key_id, algorithm);
    format!("{}.{}.{}", protected, payload_b64, signature)
}

const ALGORITHMS: [SignatureAlgorithm; 3] = [
    SignatureAlgorithm::EcdsaP256Sha256,
    SignatureAlgorithm::RsaPkcs1Sha256,
    SignatureAlgorithm::RsaPssSha512,
];

#[test]
fn compact_envelopes_verify_for_every_algorithm() {
    for algorithm in ALGORITHMS {
        let body = compact(LISTING, "dir-1", algorithm);
        let envelope = JwsEnvelope::parse(body.as_bytes()).unwrap();

        let verified = envelope
            .verify(&[verification_key("dir-1", algorithm)])
            .unwrap_or_else(|e| panic!("{} should verify: {}", algorithm, e));
        assert_eq!(verified.payload, LISTING.as_bytes());
        assert_eq!(verified.key_id, "dir-1");
    }
}

#[test]
fn tampered_payload_is_rejected_for_every_algorithm() {
    for algorithm in ALGORITHMS {
        let body = compact(LISTING, "dir-1", algorithm);
        let mut parts: Vec<String> = body.split('.').map(str::to_string).collect();
        parts[1] = URL_SAFE_NO_PAD.encode(LISTING.replace("a.example.com", "evil.example.com"));
        let envelope = JwsEnvelope::parse(parts.join(".").as_bytes()).unwrap();

        assert!(
            envelope.verify(&[verification_key("dir-1", algorithm)]).is_err(),
            "{} accepted a tampered payload",
            algorithm
        );
    }
}

#[test]
fn key_must_match_protected_algorithm() {
    // RS256 signature offered to a PS512 key over the same RSA material
    let body = compact(LISTING, "dir-1", SignatureAlgorithm::RsaPkcs1Sha256);
    let envelope = JwsEnvelope::parse(body.as_bytes()).unwrap();
    assert!(envelope
        .verify(&[verification_key("dir-1", SignatureAlgorithm::RsaPssSha512)])
        .is_err());

    // ES256 signature checked against the RSA key
    let body = compact(LISTING, "dir-1", SignatureAlgorithm::EcdsaP256Sha256);
    let envelope = JwsEnvelope::parse(body.as_bytes()).unwrap();
    let wrong_key = VerificationKey::new("dir-1", RSA_PUBLIC, SignatureAlgorithm::EcdsaP256Sha256);
    assert!(envelope.verify(&[wrong_key]).is_err());
}

#[test]
fn general_envelope_accepts_any_matching_slot() {
    let payload_b64 = URL_SAFE_NO_PAD.encode(LISTING);
    let (ec_protected, ec_signature) = sign_slot(&payload_b64, "dir-ec", SignatureAlgorithm::EcdsaP256Sha256);
    let (rsa_protected, rsa_signature) = sign_slot(&payload_b64, "dir-rsa", SignatureAlgorithm::RsaPssSha512);
    let body = serde_json::json!({
        "payload": payload_b64,
        "signatures": [
            {"protected": ec_protected, "signature": ec_signature},
            {"protected": rsa_protected, "signature": rsa_signature},
        ],
    })
    .to_string();

    let envelope = JwsEnvelope::parse(body.as_bytes()).unwrap();
    assert_eq!(envelope.serialization(), JwsSerialization::General);
    assert_eq!(envelope.signature_count(), 2);

    let verified = envelope
        .verify(&[
            verification_key("dir-ec", SignatureAlgorithm::EcdsaP256Sha256).inactive(),
            verification_key("dir-rsa", SignatureAlgorithm::RsaPssSha512),
        ])
        .unwrap();
    assert_eq!(verified.key_id, "dir-rsa");
}

#[test]
fn flattened_es256_envelope() {
    let payload_b64 = URL_SAFE_NO_PAD.encode(LISTING);
    let (protected, signature) = sign_slot(&payload_b64, "dir-ec", SignatureAlgorithm::EcdsaP256Sha256);
    let body = serde_json::json!({
        "payload": payload_b64,
        "protected": protected,
        "signature": signature,
    })
    .to_string();

    let envelope = JwsEnvelope::parse(body.as_bytes()).unwrap();
    assert_eq!(envelope.serialization(), JwsSerialization::Flattened);
    envelope
        .verify(&[verification_key("dir-ec", SignatureAlgorithm::EcdsaP256Sha256)])
        .unwrap();
}

#[test]
fn raw_signatures_verify_through_the_algorithm() {
    let message = b"\"@method\": POST\n\"@signature-params\": (\"@method\");created=1";
    for algorithm in ALGORITHMS {
        let encoded =
            jsonwebtoken::crypto::sign(message, &encoding_key(algorithm), jwt_algorithm(algorithm)).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(encoded).unwrap();

        algorithm.verify(public_pem(algorithm), message, &raw).unwrap();
        assert!(algorithm.verify(public_pem(algorithm), b"other message", &raw).is_err());

        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(algorithm.verify(public_pem(algorithm), message, &raw).is_err());
    }
}
