//! JWS envelopes for signed directory listings
//!
//! Directory services may publish their member list wrapped in a JWS in any
//! of the three standard serializations:
//!
//! - compact: `protected.payload.signature`
//! - flattened JSON: `{"payload", "protected", "signature"}`
//! - general JSON: `{"payload", "signatures": [{"protected", "signature"}, ...]}`
//!
//! Only the protected header is trusted for `alg` and `kid`. An envelope is
//! accepted when any active key validates any one of its signatures.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::crypto::{SigningKeyManager, VerificationKey};
use crate::error::{Result, TrustError};

/// Which serialization an envelope was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsSerialization {
    Compact,
    Flattened,
    General,
}

/// One signature slot of an envelope
#[derive(Debug, Clone)]
pub struct JwsSignature {
    protected_b64: String,
    signature: Vec<u8>,
}

impl JwsSignature {
    fn protected_header(&self) -> Result<ProtectedHeader> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.protected_b64)?;
        let header: ProtectedHeader = serde_json::from_slice(&bytes)?;
        if header.crit.is_some() {
            return Err(TrustError::MalformedEnvelope(
                "critical header extensions are not supported".into(),
            ));
        }
        Ok(header)
    }
}

#[derive(Debug, Deserialize)]
struct ProtectedHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    crit: Option<Value>,
}

/// A parsed, not yet verified, JWS envelope
#[derive(Debug, Clone)]
pub struct JwsEnvelope {
    serialization: JwsSerialization,
    payload_b64: String,
    signatures: Vec<JwsSignature>,
}

/// Payload of an envelope that passed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayload {
    pub payload: Vec<u8>,
    /// Key that validated the envelope
    pub key_id: String,
}

#[derive(Deserialize)]
struct JsonEnvelope {
    payload: String,
    #[serde(default)]
    protected: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    signatures: Option<Vec<JsonSignature>>,
}

#[derive(Serialize, Deserialize)]
struct JsonSignature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    signature: String,
}

impl JwsEnvelope {
    /// Parse a body in any supported serialization
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| TrustError::MalformedEnvelope("body is not UTF-8".into()))?
            .trim();

        if text.starts_with('{') {
            Self::parse_json(text)
        } else {
            Self::parse_compact(text)
        }
    }

    fn parse_compact(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 3 {
            return Err(TrustError::MalformedEnvelope(format!(
                "compact serialization needs 3 segments, found {}",
                parts.len()
            )));
        }
        if parts[1].is_empty() {
            return Err(TrustError::MalformedEnvelope("detached payloads are not supported".into()));
        }

        let signature = signature_from_parts(Some(parts[0].to_string()), parts[2])?;
        Ok(Self {
            serialization: JwsSerialization::Compact,
            payload_b64: checked_b64(parts[1])?,
            signatures: vec![signature],
        })
    }

    fn parse_json(text: &str) -> Result<Self> {
        let envelope: JsonEnvelope = serde_json::from_str(text)
            .map_err(|e| TrustError::MalformedEnvelope(e.to_string()))?;

        let (serialization, signatures) = match (envelope.signature, envelope.signatures) {
            (Some(signature), None) => (
                JwsSerialization::Flattened,
                vec![signature_from_parts(envelope.protected, &signature)?],
            ),
            (None, Some(list)) => {
                if envelope.protected.is_some() {
                    return Err(TrustError::MalformedEnvelope(
                        "general serialization must not carry a top-level protected header".into(),
                    ));
                }
                if list.is_empty() {
                    return Err(TrustError::MalformedEnvelope("empty signatures array".into()));
                }
                let signatures = list
                    .into_iter()
                    .map(|s| signature_from_parts(s.protected, &s.signature))
                    .collect::<Result<Vec<_>>>()?;
                (JwsSerialization::General, signatures)
            }
            (Some(_), Some(_)) => {
                return Err(TrustError::MalformedEnvelope(
                    "both signature and signatures present".into(),
                ))
            }
            (None, None) => {
                return Err(TrustError::MalformedEnvelope("no signature present".into()));
            }
        };

        if envelope.payload.is_empty() {
            return Err(TrustError::MalformedEnvelope("detached payloads are not supported".into()));
        }

        Ok(Self {
            serialization,
            payload_b64: checked_b64(&envelope.payload)?,
            signatures,
        })
    }

    pub fn serialization(&self) -> JwsSerialization {
        self.serialization
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Decoded payload without any verification
    pub fn unverified_payload(&self) -> Result<Vec<u8>> {
        Ok(URL_SAFE_NO_PAD.decode(&self.payload_b64)?)
    }

    /// Verify against `keys`, skipping inactive ones
    ///
    /// Keys are tried in list order; for each key every signature slot whose
    /// protected `alg` (and `kid`, when present) matches is attempted. The
    /// first successful pairing wins.
    pub fn verify(&self, keys: &[VerificationKey]) -> Result<VerifiedPayload> {
        for key in keys.iter().filter(|k| k.active) {
            for slot in &self.signatures {
                let header = match slot.protected_header() {
                    Ok(header) => header,
                    Err(e) => {
                        debug!(error = %e, "Skipping signature with unusable protected header");
                        continue;
                    }
                };
                if header.alg != key.algorithm.jws_name() {
                    continue;
                }
                if header.kid.as_deref().is_some_and(|kid| kid != key.key_id) {
                    continue;
                }

                let signing_input = format!("{}.{}", slot.protected_b64, self.payload_b64);
                match key.verify(signing_input.as_bytes(), &slot.signature) {
                    Ok(()) => {
                        return Ok(VerifiedPayload {
                            payload: self.unverified_payload()?,
                            key_id: key.key_id.clone(),
                        });
                    }
                    Err(e) => {
                        debug!(key_id = %key.key_id, error = %e, "Signature did not verify");
                    }
                }
            }
        }

        Err(TrustError::SignatureInvalid(
            "no active key validated any signature".into(),
        ))
    }
}

fn checked_b64(segment: &str) -> Result<String> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TrustError::MalformedEnvelope(format!("invalid base64url segment: {}", e)))?;
    Ok(segment.to_string())
}

fn signature_from_parts(protected: Option<String>, signature: &str) -> Result<JwsSignature> {
    let protected_b64 = protected
        .filter(|p| !p.is_empty())
        .ok_or_else(|| TrustError::MalformedEnvelope("missing protected header".into()))?;
    checked_b64(&protected_b64)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| TrustError::MalformedEnvelope(format!("invalid signature encoding: {}", e)))?;
    Ok(JwsSignature {
        protected_b64,
        signature,
    })
}

fn protected_for(signer: &SigningKeyManager) -> Result<String> {
    let mut header = Map::new();
    header.insert("alg".into(), Value::String(signer.algorithm().jws_name().into()));
    header.insert("kid".into(), Value::String(signer.key_id().into()));
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(header))?))
}

/// Sign `payload` with the local key in compact serialization
pub fn sign_compact(payload: &[u8], signer: &SigningKeyManager) -> Result<String> {
    let protected = protected_for(signer)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signature = signer.sign(format!("{}.{}", protected, payload_b64).as_bytes())?;
    Ok(format!(
        "{}.{}.{}",
        protected,
        payload_b64,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Sign `payload` with several keys in general JSON serialization
pub fn sign_general(payload: &[u8], signers: &[&SigningKeyManager]) -> Result<String> {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let mut signatures = Vec::with_capacity(signers.len());
    for signer in signers {
        let protected = protected_for(signer)?;
        let signature = signer.sign(format!("{}.{}", protected, payload_b64).as_bytes())?;
        signatures.push(JsonSignature {
            protected: Some(protected),
            signature: URL_SAFE_NO_PAD.encode(signature),
        });
    }

    Ok(serde_json::to_string(&serde_json::json!({
        "payload": payload_b64,
        "signatures": signatures,
    }))?)
}
