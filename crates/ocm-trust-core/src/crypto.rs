//! Cryptographic primitives
//!
//! - `SignatureAlgorithm`: the closed set of algorithms accepted from
//!   configuration and from signature headers
//! - `VerificationKey`: a configured third-party public key
//! - `SigningKeyManager`: this server's Ed25519 signing key, loaded from or
//!   persisted to a PKCS#8 PEM file

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::authority::{normalize, split_url};
use crate::error::{Result, TrustError};

/// Signature algorithms understood by the trust core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SignatureAlgorithm {
    /// Ed25519 (`EdDSA` / `ed25519`)
    Ed25519,
    /// ECDSA P-256 with SHA-256, fixed-size signatures (`ES256` / `ecdsa-p256-sha256`)
    EcdsaP256Sha256,
    /// RSASSA-PKCS1-v1_5 with SHA-256 (`RS256` / `rsa-v1_5-sha256`)
    RsaPkcs1Sha256,
    /// RSASSA-PSS with SHA-512 (`PS512` / `rsa-pss-sha512`)
    RsaPssSha512,
}

impl SignatureAlgorithm {
    /// Name used in a JWS protected header
    pub fn jws_name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "EdDSA",
            Self::EcdsaP256Sha256 => "ES256",
            Self::RsaPkcs1Sha256 => "RS256",
            Self::RsaPssSha512 => "PS512",
        }
    }

    /// Name used in an HTTP message signature `alg` parameter
    pub fn http_sig_name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
            Self::RsaPkcs1Sha256 => "rsa-v1_5-sha256",
            Self::RsaPssSha512 => "rsa-pss-sha512",
        }
    }

    /// Verify `signature` over `message` with a PEM (SPKI) public key
    ///
    /// This is the single place algorithm identity turns into a primitive.
    pub fn verify(&self, public_key_pem: &str, message: &[u8], signature: &[u8]) -> Result<()> {
        let (key, algorithm) = match self {
            Self::Ed25519 => {
                let key = VerifyingKey::from_public_key_pem(public_key_pem.trim())
                    .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
                let signature = Signature::from_slice(signature)?;
                return key.verify_strict(message, &signature).map_err(TrustError::from);
            }
            Self::EcdsaP256Sha256 => (
                DecodingKey::from_ec_pem(public_key_pem.as_bytes())
                    .map_err(|e| TrustError::InvalidKey(e.to_string()))?,
                Algorithm::ES256,
            ),
            Self::RsaPkcs1Sha256 => (
                DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| TrustError::InvalidKey(e.to_string()))?,
                Algorithm::RS256,
            ),
            Self::RsaPssSha512 => (
                DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| TrustError::InvalidKey(e.to_string()))?,
                Algorithm::PS512,
            ),
        };

        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let encoded = URL_SAFE_NO_PAD.encode(signature);
        if jsonwebtoken::crypto::verify(&encoded, message, &key, algorithm)? {
            Ok(())
        } else {
            Err(TrustError::SignatureInvalid(format!("{} signature did not verify", self)))
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.http_sig_name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eddsa" | "ed25519" => Ok(Self::Ed25519),
            "es256" | "ecdsa-p256-sha256" => Ok(Self::EcdsaP256Sha256),
            "rs256" | "rsa-v1_5-sha256" => Ok(Self::RsaPkcs1Sha256),
            "ps512" | "rsa-pss-sha512" => Ok(Self::RsaPssSha512),
            other => Err(TrustError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl TryFrom<String> for SignatureAlgorithm {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SignatureAlgorithm> for String {
    fn from(alg: SignatureAlgorithm) -> Self {
        alg.jws_name().to_string()
    }
}

/// A third-party public key supplied by trust-group configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    /// Key identifier, matched against a JWS `kid` when one is present
    pub key_id: String,
    /// SPKI public key in PEM form
    pub public_key_pem: String,
    /// Algorithm this key signs with
    pub algorithm: SignatureAlgorithm,
    /// Inactive keys are never attempted
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl VerificationKey {
    pub fn new(
        key_id: impl Into<String>,
        public_key_pem: impl Into<String>,
        algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            public_key_pem: public_key_pem.into(),
            algorithm,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        self.algorithm.verify(&self.public_key_pem, message, signature)
    }
}

/// Fragment appended to the public origin to form the key ID
const KEY_ID_SUFFIX: &str = "/ocm#key-1";

/// Derive the stable key ID from the local public origin
///
/// `https://Cloud.Example.com:443/` becomes `https://cloud.example.com:443/ocm#key-1`.
/// The port is kept as written; comparisons go through authority normalization.
pub fn derive_key_id(public_origin: &str) -> Result<String> {
    let origin = public_origin.trim().trim_end_matches('/').to_ascii_lowercase();
    let parts = split_url(&origin)?;
    let parsed = &parts.parsed;
    if !matches!(parsed.scheme(), "http" | "https")
        || !parsed.username().is_empty()
        || parsed.password().is_some()
        || parsed.query().is_some()
        || parsed.fragment().is_some()
    {
        return Err(TrustError::InvalidUrl(public_origin.to_string()));
    }
    normalize(parts.authority, parsed.scheme())?;
    Ok(format!("{}{}", origin, KEY_ID_SUFFIX))
}

/// Owner of this server's signing key
///
/// The key slot is written once by [`SigningKeyManager::load_or_generate`]
/// and read by every signing call afterwards. Private key material never
/// leaves this type except to its own key file.
pub struct SigningKeyManager {
    key_id: String,
    key_path: Option<PathBuf>,
    slot: RwLock<Option<SigningKey>>,
    load_lock: Mutex<()>,
}

impl fmt::Debug for SigningKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyManager")
            .field("key_id", &self.key_id)
            .field("key_path", &self.key_path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl SigningKeyManager {
    /// Create a manager for `public_origin`
    ///
    /// With `key_path` unset the key is generated in memory on every start.
    pub fn new(public_origin: &str, key_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            key_id: derive_key_id(public_origin)?,
            key_path,
            slot: RwLock::new(None),
            load_lock: Mutex::new(()),
        })
    }

    /// Load the persisted key, or generate and persist a fresh one
    ///
    /// Concurrent callers are serialized; once a key is loaded further calls
    /// are no-ops.
    pub fn load_or_generate(&self) -> Result<()> {
        let _guard = self.load_lock.lock();
        if self.slot.read().is_some() {
            return Ok(());
        }

        let key = match &self.key_path {
            Some(path) => match read_key(path) {
                Ok(key) => {
                    info!(key_id = %self.key_id, path = %path.display(), "Loaded signing key");
                    key
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Signing key not loadable, generating a new one"
                    );
                    let key = SigningKey::generate(&mut OsRng);
                    persist_key(path, &key)?;
                    info!(key_id = %self.key_id, path = %path.display(), "Generated and persisted signing key");
                    key
                }
            },
            None => {
                info!(key_id = %self.key_id, "Generated ephemeral signing key");
                SigningKey::generate(&mut OsRng)
            }
        };

        *self.slot.write() = Some(key);
        Ok(())
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let slot = self.slot.read();
        let key = slot.as_ref().ok_or(TrustError::NoSigningKey)?;
        Ok(key.sign(payload).to_bytes().to_vec())
    }

    /// SPKI PEM of the public half
    pub fn public_key_pem(&self) -> Result<String> {
        let slot = self.slot.read();
        let key = slot.as_ref().ok_or(TrustError::NoSigningKey)?;
        key.verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TrustError::InvalidKey(e.to_string()))
    }
}

fn read_key(path: &Path) -> Result<SigningKey> {
    let pem = std::fs::read_to_string(path).map_err(|e| TrustError::KeyStorage(e.to_string()))?;
    SigningKey::from_pkcs8_pem(&pem).map_err(|e| TrustError::InvalidKey(e.to_string()))
}

fn persist_key(path: &Path, key: &SigningKey) -> Result<()> {
    use std::io::Write;

    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| TrustError::InvalidKey(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TrustError::KeyStorage(e.to_string()))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| TrustError::KeyStorage(e.to_string()))?;

    // mode() only applies on creation; tighten a pre-existing file as well
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| TrustError::KeyStorage(e.to_string()))?;
    }

    file.write_all(pem.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| TrustError::KeyStorage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_manager() -> SigningKeyManager {
        let manager = SigningKeyManager::new("https://cloud.example.com", None).unwrap();
        manager.load_or_generate().unwrap();
        manager
    }

    #[test]
    fn test_key_id_derivation() {
        assert_eq!(
            derive_key_id("https://Cloud.Example.com/").unwrap(),
            "https://cloud.example.com/ocm#key-1"
        );
        assert_eq!(
            derive_key_id("https://cloud.example.com:443").unwrap(),
            "https://cloud.example.com:443/ocm#key-1"
        );
        assert_eq!(
            derive_key_id("http://[::1]:9200").unwrap(),
            "http://[::1]:9200/ocm#key-1"
        );
    }

    #[test]
    fn test_key_id_rejects_bad_origins() {
        assert!(derive_key_id("cloud.example.com").is_err());
        assert!(derive_key_id("ftp://cloud.example.com").is_err());
        assert!(derive_key_id("https://cloud.example.com/?x=1").is_err());
        assert!(derive_key_id("https://admin@cloud.example.com").is_err());
        assert!(derive_key_id("https://cloud.example.com#frag").is_err());
    }

    #[test]
    fn test_sign_requires_loaded_key() {
        let manager = SigningKeyManager::new("https://cloud.example.com", None).unwrap();
        assert!(matches!(manager.sign(b"data"), Err(TrustError::NoSigningKey)));
        assert!(matches!(manager.public_key_pem(), Err(TrustError::NoSigningKey)));
    }

    #[test]
    fn test_sign_and_verify() {
        let manager = loaded_manager();
        let pem = manager.public_key_pem().unwrap();

        let signature = manager.sign(b"hello federation").unwrap();
        assert_eq!(signature.len(), 64);

        SignatureAlgorithm::Ed25519
            .verify(&pem, b"hello federation", &signature)
            .unwrap();
        assert!(SignatureAlgorithm::Ed25519
            .verify(&pem, b"hello federatioN", &signature)
            .is_err());
    }

    #[test]
    fn test_load_or_generate_is_idempotent() {
        let manager = loaded_manager();
        let before = manager.public_key_pem().unwrap();
        manager.load_or_generate().unwrap();
        assert_eq!(manager.public_key_pem().unwrap(), before);
    }

    #[test]
    fn test_key_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("signing.pem");

        let first = SigningKeyManager::new("https://cloud.example.com", Some(path.clone())).unwrap();
        first.load_or_generate().unwrap();
        assert!(path.exists());

        let second = SigningKeyManager::new("https://cloud.example.com", Some(path.clone())).unwrap();
        second.load_or_generate().unwrap();

        assert_eq!(first.public_key_pem().unwrap(), second.public_key_pem().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.pem");
        let manager = SigningKeyManager::new("https://cloud.example.com", Some(path.clone())).unwrap();
        manager.load_or_generate().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_key_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.pem");
        std::fs::write(&path, "not a key").unwrap();

        let manager = SigningKeyManager::new("https://cloud.example.com", Some(path.clone())).unwrap();
        manager.load_or_generate().unwrap();

        let persisted = std::fs::read_to_string(&path).unwrap();
        assert!(persisted.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_algorithm_names() {
        for name in ["EdDSA", "ed25519", "ED25519"] {
            assert_eq!(name.parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Ed25519);
        }
        assert_eq!("ES256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::EcdsaP256Sha256);
        assert_eq!("rsa-v1_5-sha256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::RsaPkcs1Sha256);
        assert_eq!("PS512".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::RsaPssSha512);
        assert!("HS256".parse::<SignatureAlgorithm>().is_err());
        assert!("none".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_verification_key_deserializes_algorithm() {
        let key: VerificationKey = serde_json::from_str(
            r#"{"key_id": "dir-1", "public_key_pem": "pem", "algorithm": "ed25519"}"#,
        )
        .unwrap();
        assert_eq!(key.algorithm, SignatureAlgorithm::Ed25519);
        assert!(key.active);

        let err = serde_json::from_str::<VerificationKey>(
            r#"{"key_id": "dir-1", "public_key_pem": "pem", "algorithm": "HS256", "active": true}"#,
        );
        assert!(err.is_err());
    }
}
