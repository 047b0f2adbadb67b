//! Policy Engine
//!
//! Evaluates a peer authority against the configured lists and trust-group
//! membership. Precedence is fixed:
//!
//! 1. enforcement disabled  → allow (`policy_disabled`)
//! 2. deny list             → deny  (`denied_by_denylist`)
//! 3. allow list            → allow (`allowed_by_allowlist`)
//! 4. exempt list           → allow (`allowed_by_exempt`)
//! 5. trust-group member    → allow (`allowed_by_federation`)
//! 6. otherwise             → deny  (`not_allowed`)
//!
//! Reason codes are logged on the `ocm_trust::audit` target and returned to
//! callers; their strings never change.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use ocm_trust_core::normalize;

use crate::config::ConfigError;
use crate::trust::TrustGroupManager;

/// Tracing target for policy decisions
pub const AUDIT_TARGET: &str = "ocm_trust::audit";

/// Allow/deny/exempt lists and the global switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub global_enforce: bool,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
    #[serde(default)]
    pub exempt_list: Vec<String>,
}

impl PolicyConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Enforcing policy with empty lists
    pub fn enforcing() -> Self {
        Self {
            global_enforce: true,
            ..Self::default()
        }
    }
}

/// Why a peer was allowed or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    PolicyDisabled,
    DeniedByDenylist,
    AllowedByAllowlist,
    AllowedByExempt,
    AllowedByFederation,
    NotAllowed,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PolicyDisabled => "policy_disabled",
            ReasonCode::DeniedByDenylist => "denied_by_denylist",
            ReasonCode::AllowedByAllowlist => "allowed_by_allowlist",
            ReasonCode::AllowedByExempt => "allowed_by_exempt",
            ReasonCode::AllowedByFederation => "allowed_by_federation",
            ReasonCode::NotAllowed => "not_allowed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: ReasonCode,
    pub authenticated: bool,
}

/// Trust-group membership as seen by the policy engine
pub trait MembershipSource: Send + Sync {
    fn is_member(&self, host: &str, require_verified: bool) -> bool;

    /// Whether membership must come from verified listings
    fn require_verified(&self) -> bool;
}

impl MembershipSource for TrustGroupManager {
    fn is_member(&self, host: &str, require_verified: bool) -> bool {
        TrustGroupManager::is_member(self, host, require_verified)
    }

    fn require_verified(&self) -> bool {
        TrustGroupManager::require_verified(self)
    }
}

/// A list entry set matched case-insensitively
///
/// Entries that parse as authorities also match their normalized form, so
/// `example.com:443` and `example.com` are the same entry.
#[derive(Debug, Default)]
struct HostList(HashSet<String>);

impl HostList {
    fn new(entries: &[String]) -> Self {
        let mut set = HashSet::new();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            set.insert(entry.to_ascii_lowercase());
            if let Ok(authority) = normalize(entry, "https") {
                set.insert(authority.into_string());
            }
        }
        Self(set)
    }

    fn contains(&self, peer: &PeerKey) -> bool {
        self.0.contains(&peer.lowercase)
            || peer.normalized.as_ref().is_some_and(|n| self.0.contains(n))
    }
}

struct PeerKey {
    lowercase: String,
    normalized: Option<String>,
}

impl PeerKey {
    fn new(peer: &str) -> Self {
        let peer = peer.trim();
        Self {
            lowercase: peer.to_ascii_lowercase(),
            normalized: normalize(peer, "https").ok().map(|a| a.into_string()),
        }
    }
}

struct CompiledPolicy {
    config: Arc<PolicyConfig>,
    allow: HostList,
    deny: HostList,
    exempt: HostList,
}

impl CompiledPolicy {
    fn new(config: PolicyConfig) -> Self {
        Self {
            allow: HostList::new(&config.allow_list),
            deny: HostList::new(&config.deny_list),
            exempt: HostList::new(&config.exempt_list),
            config: Arc::new(config),
        }
    }
}

/// Peer policy evaluation with whole-object hot reload
pub struct PolicyEngine {
    policy: RwLock<Arc<CompiledPolicy>>,
    membership: Option<Arc<dyn MembershipSource>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            policy: RwLock::new(Arc::new(CompiledPolicy::new(config))),
            membership: None,
        }
    }

    pub fn with_membership(mut self, membership: Arc<dyn MembershipSource>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Current configuration
    pub fn policy(&self) -> Arc<PolicyConfig> {
        self.policy.read().config.clone()
    }

    /// Replace the whole configuration
    pub fn update_policy(&self, config: PolicyConfig) {
        let compiled = Arc::new(CompiledPolicy::new(config));
        info!(
            global_enforce = compiled.config.global_enforce,
            allow = compiled.config.allow_list.len(),
            deny = compiled.config.deny_list.len(),
            exempt = compiled.config.exempt_list.len(),
            "Policy updated"
        );
        *self.policy.write() = compiled;
    }

    /// Decision for a request whose peer could not be resolved
    ///
    /// Only a disabled policy admits it; `None` otherwise.
    pub fn evaluate_unidentified(&self) -> Option<PolicyDecision> {
        if self.policy.read().config.global_enforce {
            return None;
        }
        let decision = PolicyDecision {
            allowed: true,
            reason: ReasonCode::PolicyDisabled,
            authenticated: false,
        };
        info!(target: AUDIT_TARGET, reason = %decision.reason, authenticated = false, "Unidentified peer admitted");
        Some(decision)
    }

    pub fn evaluate(&self, peer: &str, authenticated: bool) -> PolicyDecision {
        let policy = self.policy.read().clone();
        let reason = self.decide(&policy, peer);
        let decision = PolicyDecision {
            allowed: !matches!(reason, ReasonCode::DeniedByDenylist | ReasonCode::NotAllowed),
            reason,
            authenticated,
        };

        info!(
            target: AUDIT_TARGET,
            peer = %peer,
            reason = %decision.reason,
            allowed = decision.allowed,
            authenticated,
            "Policy decision"
        );
        decision
    }

    fn decide(&self, policy: &CompiledPolicy, peer: &str) -> ReasonCode {
        if !policy.config.global_enforce {
            return ReasonCode::PolicyDisabled;
        }

        let key = PeerKey::new(peer);
        if policy.deny.contains(&key) {
            return ReasonCode::DeniedByDenylist;
        }
        if policy.allow.contains(&key) {
            return ReasonCode::AllowedByAllowlist;
        }
        if policy.exempt.contains(&key) {
            return ReasonCode::AllowedByExempt;
        }

        if let Some(membership) = &self.membership {
            if membership.is_member(peer, membership.require_verified()) {
                return ReasonCode::AllowedByFederation;
            }
        }
        ReasonCode::NotAllowed
    }
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("policy", &self.policy())
            .field("membership", &self.membership.is_some())
            .finish()
    }
}
