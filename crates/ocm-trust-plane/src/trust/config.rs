//! Trust group configuration files
//!
//! ```json
//! {
//!   "trust_group_id": "research-net",
//!   "enabled": true,
//!   "enforce_membership": true,
//!   "verification_policy": "required",
//!   "directory_services": [{"url": "https://dir.example.org/listing", "enabled": true}],
//!   "keys": [{"key_id": "dir-2024", "public_key_pem": "-----BEGIN PUBLIC KEY-----...", "algorithm": "EdDSA", "active": true}]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use ocm_trust_core::VerificationKey;
use ocm_trust_directory::VerificationPolicy;

use crate::config::ConfigError;

const DEPRECATED_ID_KEY: &str = "federation_id";
const ID_KEY: &str = "trust_group_id";

fn default_true() -> bool {
    true
}

/// One directory service endpoint of a trust group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryServiceConfig {
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DirectoryServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
        }
    }
}

/// Configuration of one trust group
///
/// Replaced whole on update, never mutated field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustGroupConfig {
    pub trust_group_id: String,
    pub directory_services: Vec<DirectoryServiceConfig>,
    pub keys: Vec<VerificationKey>,
    pub enabled: bool,
    pub enforce_membership: bool,
    pub verification_policy: VerificationPolicy,
}

#[derive(Deserialize)]
struct RawTrustGroupConfig {
    trust_group_id: String,
    #[serde(default)]
    directory_services: Vec<DirectoryServiceConfig>,
    #[serde(default)]
    keys: Vec<VerificationKey>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    enforce_membership: bool,
    #[serde(default)]
    verification_policy: Option<VerificationPolicy>,
}

impl TrustGroupConfig {
    /// An enabled group with no endpoints or keys yet
    pub fn new(trust_group_id: impl Into<String>) -> Self {
        Self {
            trust_group_id: trust_group_id.into(),
            directory_services: Vec::new(),
            keys: Vec::new(),
            enabled: true,
            enforce_membership: false,
            verification_policy: VerificationPolicy::Optional,
        }
    }

    pub fn with_directory_service(mut self, url: impl Into<String>) -> Self {
        self.directory_services.push(DirectoryServiceConfig::new(url));
        self
    }

    pub fn with_key(mut self, key: VerificationKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.verification_policy = policy;
        self
    }

    pub fn enforcing(mut self) -> Self {
        self.enforce_membership = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Load and validate a trust group file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &contents)
    }

    /// Parse a trust group document; `path` is only used in error messages
    pub fn from_json(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let object = value.as_object().ok_or_else(|| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: "trust group config must be a JSON object".into(),
        })?;
        match (object.contains_key(ID_KEY), object.contains_key(DEPRECATED_ID_KEY)) {
            (true, true) => return Err(ConfigError::ConflictingKeys { path: path.to_path_buf() }),
            (false, true) => return Err(ConfigError::DeprecatedKey { path: path.to_path_buf() }),
            _ => {}
        }

        let raw: RawTrustGroupConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Invalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let trust_group_id = raw.trust_group_id.trim().to_string();
        if trust_group_id.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: "trust_group_id must not be empty".into(),
            });
        }
        if let Some(service) = raw.directory_services.iter().find(|s| s.url.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: format!("directory service url must not be empty: {:?}", service),
            });
        }

        let verification_policy = raw.verification_policy.unwrap_or(if raw.enforce_membership {
            VerificationPolicy::Required
        } else {
            VerificationPolicy::Optional
        });

        Ok(Self {
            trust_group_id,
            directory_services: raw.directory_services,
            keys: raw.keys,
            enabled: raw.enabled,
            enforce_membership: raw.enforce_membership,
            verification_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_trust_core::SignatureAlgorithm;
    use std::io::Write;

    fn parse(json: &str) -> Result<TrustGroupConfig, ConfigError> {
        TrustGroupConfig::from_json(Path::new("group.json"), json)
    }

    #[test]
    fn test_full_document() {
        let config = parse(
            r#"{
                "trust_group_id": "research-net",
                "enabled": true,
                "enforce_membership": true,
                "directory_services": [
                    {"url": "https://dir.example.org/listing", "enabled": true},
                    {"url": "https://mirror.example.org/listing", "enabled": false}
                ],
                "keys": [
                    {"key_id": "dir-1", "public_key_pem": "PEM", "algorithm": "EdDSA", "active": true},
                    {"key_id": "dir-2", "public_key_pem": "PEM", "algorithm": "rsa-pss-sha512", "active": false}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.trust_group_id, "research-net");
        assert_eq!(config.directory_services.len(), 2);
        assert!(!config.directory_services[1].enabled);
        assert_eq!(config.keys[0].algorithm, SignatureAlgorithm::Ed25519);
        assert_eq!(config.keys[1].algorithm, SignatureAlgorithm::RsaPssSha512);
        assert!(!config.keys[1].active);
        assert_eq!(config.verification_policy, VerificationPolicy::Required);
    }

    #[test]
    fn test_policy_defaults_follow_enforcement() {
        let relaxed = parse(r#"{"trust_group_id": "g"}"#).unwrap();
        assert!(relaxed.enabled);
        assert_eq!(relaxed.verification_policy, VerificationPolicy::Optional);

        let explicit = parse(r#"{"trust_group_id": "g", "enforce_membership": true, "verification_policy": "off"}"#)
            .unwrap();
        assert_eq!(explicit.verification_policy, VerificationPolicy::Off);
    }

    #[test]
    fn test_deprecated_federation_id_is_rejected() {
        let err = parse(r#"{"federation_id": "old"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::DeprecatedKey { .. }));
        assert!(err.to_string().contains("trust_group_id"));
    }

    #[test]
    fn test_both_id_keys_conflict() {
        let err = parse(r#"{"trust_group_id": "new", "federation_id": "old"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingKeys { .. }));
    }

    #[test]
    fn test_invalid_documents() {
        for json in [
            r#"{"trust_group_id": "  "}"#,
            r#"{"enabled": true}"#,
            r#"{"trust_group_id": "g", "keys": [{"key_id": "k", "public_key_pem": "PEM", "algorithm": "HS256"}]}"#,
            r#"{"trust_group_id": "g", "directory_services": [{"url": ""}]}"#,
            r#"["trust_group_id"]"#,
        ] {
            assert!(
                matches!(parse(json), Err(ConfigError::Invalid { .. })),
                "accepted {}",
                json
            );
        }
        assert!(matches!(parse("{"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"trust_group_id": "from-disk"}}"#).unwrap();

        let config = TrustGroupConfig::from_file(file.path()).unwrap();
        assert_eq!(config.trust_group_id, "from-disk");

        let missing = TrustGroupConfig::from_file(Path::new("/nonexistent/group.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
