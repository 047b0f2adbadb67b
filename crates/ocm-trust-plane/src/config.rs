//! Server configuration
//!
//! Everything is read from `OCM_TRUST_*` environment variables. Any error
//! here is fatal: the server must not start with an ambiguous trust setup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::api::middleware::SignatureMode;
use crate::trust::ManagerSettings;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{path}: `federation_id` is no longer supported, rename it to `trust_group_id`")]
    DeprecatedKey { path: PathBuf },

    #[error("{path}: both `trust_group_id` and `federation_id` are set, keep only `trust_group_id`")]
    ConflictingKeys { path: PathBuf },

    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("Missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Runtime configuration of the trust plane server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
    /// Public origin of this server, e.g. `https://cloud.example.org`
    pub public_origin: String,
    pub key_path: Option<PathBuf>,
    pub signature_mode: SignatureMode,
    pub allow_mismatch: bool,
    pub discovery_fail_open: bool,
    pub group_configs: Vec<PathBuf>,
    pub policy_file: Option<PathBuf>,
    pub group_ttl: Duration,
    pub max_stale: Duration,
    pub fetch_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let public_origin =
            var("OCM_TRUST_PUBLIC_ORIGIN").ok_or(ConfigError::MissingEnv("OCM_TRUST_PUBLIC_ORIGIN"))?;

        let group_configs = var("OCM_TRUST_GROUP_CONFIGS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: parsed(&var, "OCM_TRUST_PORT", 8080)?,
            log_level: var("OCM_TRUST_LOG_LEVEL").unwrap_or_else(|| "info".into()),
            public_origin,
            key_path: var("OCM_TRUST_KEY_PATH").map(PathBuf::from),
            signature_mode: parsed(&var, "OCM_TRUST_SIGNATURE_MODE", SignatureMode::Lenient)?,
            allow_mismatch: parsed(&var, "OCM_TRUST_ALLOW_MISMATCH", false)?,
            discovery_fail_open: parsed(&var, "OCM_TRUST_DISCOVERY_FAIL_OPEN", false)?,
            group_configs,
            policy_file: var("OCM_TRUST_POLICY_FILE").map(PathBuf::from),
            group_ttl: Duration::from_secs(parsed(&var, "OCM_TRUST_GROUP_TTL_SECS", 21_600)?),
            max_stale: Duration::from_secs(parsed(&var, "OCM_TRUST_MAX_STALE_SECS", 604_800)?),
            fetch_timeout: Duration::from_secs(parsed(&var, "OCM_TRUST_FETCH_TIMEOUT_SECS", 10)?),
        })
    }

    /// Trust group manager timings derived from this configuration
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            ttl: self.group_ttl,
            max_stale: self.max_stale,
            fetch_timeout: self.fetch_timeout,
            ..ManagerSettings::default()
        }
    }
}

fn parsed<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidEnv { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            ServerConfig::from_lookup(lookup(&[("OCM_TRUST_PUBLIC_ORIGIN", "https://cloud.example.org")]))
                .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.signature_mode, SignatureMode::Lenient);
        assert!(!config.allow_mismatch);
        assert!(!config.discovery_fail_open);
        assert!(config.group_configs.is_empty());
        assert!(config.policy_file.is_none());
        assert_eq!(config.group_ttl, Duration::from_secs(6 * 3600));
        assert_eq!(config.max_stale, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_public_origin_is_required() {
        let err = ServerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("OCM_TRUST_PUBLIC_ORIGIN")));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("OCM_TRUST_PUBLIC_ORIGIN", "https://cloud.example.org"),
            ("OCM_TRUST_PORT", "9200"),
            ("OCM_TRUST_SIGNATURE_MODE", "strict"),
            ("OCM_TRUST_GROUP_CONFIGS", "/etc/ocm/a.json, /etc/ocm/b.json,"),
            ("OCM_TRUST_DISCOVERY_FAIL_OPEN", "true"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9200);
        assert_eq!(config.signature_mode, SignatureMode::Strict);
        assert_eq!(config.group_configs.len(), 2);
        assert!(config.discovery_fail_open);
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("OCM_TRUST_PUBLIC_ORIGIN", "https://cloud.example.org"),
            ("OCM_TRUST_SIGNATURE_MODE", "sometimes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "OCM_TRUST_SIGNATURE_MODE", .. }));
    }
}
