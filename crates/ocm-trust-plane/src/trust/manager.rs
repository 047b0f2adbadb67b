//! Trust Group Manager
//!
//! Owns the registered trust groups and their membership caches. Membership
//! checks only ever read the cache; a stale cache schedules a background
//! refresh and is served as-is until that refresh lands (stale-while-revalidate).
//!
//! Per group:
//!
//! ```text
//! never refreshed -> refreshing -> fresh -> stale -> refreshing -> ...
//! ```
//!
//! - at most one refresh is in flight per group (`refreshing` flag)
//! - a refresh runs as its own tokio task with its own timeout budget, so
//!   the request that triggered it cannot cancel it
//! - if every directory service fails, the previous cache is kept and keeps
//!   answering until it is older than `max_stale`
//! - a refresh that finishes after its group was reconfigured is discarded

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ocm_trust_core::authority::authority_from_url;
use ocm_trust_core::{normalize, Authority, DirectoryListing};
use ocm_trust_directory::DirectoryClient;

use super::config::TrustGroupConfig;

/// Errors from an explicit refresh
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Unknown trust group: {0}")]
    UnknownGroup(String),

    #[error("Refresh already in progress for trust group {0}")]
    InProgress(String),

    #[error("Trust group {0} has no enabled directory services")]
    NoDirectoryServices(String),

    #[error("Trust group {0} was reconfigured during the refresh")]
    Superseded(String),

    #[error("All {failures} directory services of trust group {group} failed, last error: {last}")]
    AllFailed {
        group: String,
        failures: usize,
        last: String,
    },
}

/// Cache timings
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// Age after which a cache is refreshed
    pub ttl: Duration,
    /// Age after which a cache no longer answers membership checks
    pub max_stale: Duration,
    /// Minimum wait after a refresh in which every fetch failed
    pub retry_interval: Duration,
    /// Budget per enabled directory service
    pub fetch_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6 * 3600),
            max_stale: Duration::from_secs(7 * 24 * 3600),
            retry_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Memoized membership built from one successful refresh
#[derive(Debug, Default)]
struct MembershipCache {
    /// Authorities from every fetched listing
    all: HashSet<Authority>,
    /// Authorities from verified listings only
    verified: HashSet<Authority>,
    listings: Vec<DirectoryListing>,
}

impl MembershipCache {
    fn from_listings(listings: Vec<DirectoryListing>) -> Self {
        let mut all = HashSet::new();
        let mut verified = HashSet::new();

        for listing in &listings {
            for server in &listing.servers {
                match authority_from_url(&server.url) {
                    Ok(authority) => {
                        if listing.verified {
                            verified.insert(authority.clone());
                        }
                        all.insert(authority);
                    }
                    Err(e) => {
                        debug!(url = %server.url, error = %e, "Skipping unparseable server URL");
                    }
                }
            }
        }

        Self {
            all,
            verified,
            listings,
        }
    }

    fn contains(&self, authority: &Authority, require_verified: bool) -> bool {
        if require_verified {
            self.verified.contains(authority)
        } else {
            self.all.contains(authority)
        }
    }
}

struct GroupState {
    config: Arc<TrustGroupConfig>,
    cache: Arc<MembershipCache>,
    last_refresh: Option<Instant>,
    last_failure: Option<Instant>,
    force_refresh: bool,
    refreshing: Arc<Mutex<bool>>,
}

impl GroupState {
    fn new(config: TrustGroupConfig) -> Self {
        Self {
            config: Arc::new(config),
            cache: Arc::new(MembershipCache::default()),
            last_refresh: None,
            last_failure: None,
            force_refresh: false,
            refreshing: Arc::new(Mutex::new(false)),
        }
    }

    /// Cache usable for answers: populated and not older than `max_stale`
    fn usable_cache(&self, now: Instant, settings: &ManagerSettings) -> Option<&MembershipCache> {
        let refreshed = self.last_refresh?;
        if now.duration_since(refreshed) > settings.max_stale {
            return None;
        }
        Some(&self.cache)
    }

    fn needs_refresh(&self, now: Instant, settings: &ManagerSettings) -> bool {
        let stale = self.force_refresh
            || self
                .last_refresh
                .map_or(true, |t| now.duration_since(t) > settings.ttl);
        if !stale {
            return false;
        }
        self.last_failure
            .map_or(true, |t| now.duration_since(t) >= settings.retry_interval)
    }
}

/// Clears a group's `refreshing` flag when the refresh ends, however it ends
struct RefreshGuard(Arc<Mutex<bool>>);

impl RefreshGuard {
    fn acquire(flag: &Arc<Mutex<bool>>) -> Option<Self> {
        let mut refreshing = flag.lock();
        if *refreshing {
            return None;
        }
        *refreshing = true;
        Some(Self(flag.clone()))
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

struct Inner {
    groups: RwLock<HashMap<String, GroupState>>,
    directory: DirectoryClient,
    settings: ManagerSettings,
}

/// Registry of trust groups with cached, asynchronously refreshed membership
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct TrustGroupManager {
    inner: Arc<Inner>,
}

impl TrustGroupManager {
    pub fn new(directory: DirectoryClient, settings: ManagerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                groups: RwLock::new(HashMap::new()),
                directory,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Register a group with an empty cache
    ///
    /// Registering an existing ID replaces it, cache included.
    pub fn add_trust_group(&self, config: TrustGroupConfig) {
        let id = config.trust_group_id.clone();
        info!(
            trust_group = %id,
            enabled = config.enabled,
            enforce_membership = config.enforce_membership,
            verification_policy = %config.verification_policy,
            directory_services = config.directory_services.len(),
            "Registered trust group"
        );
        self.inner.groups.write().insert(id, GroupState::new(config));
    }

    /// Swap a group's configuration, keeping its cache until the next refresh
    pub fn update_trust_group(&self, config: TrustGroupConfig) -> bool {
        let mut groups = self.inner.groups.write();
        match groups.get_mut(&config.trust_group_id) {
            Some(state) => {
                info!(trust_group = %config.trust_group_id, "Updated trust group configuration");
                state.config = Arc::new(config);
                state.force_refresh = true;
                state.last_failure = None;
                true
            }
            None => false,
        }
    }

    pub fn remove_trust_group(&self, trust_group_id: &str) -> bool {
        let removed = self.inner.groups.write().remove(trust_group_id).is_some();
        if removed {
            info!(trust_group = %trust_group_id, "Removed trust group");
        }
        removed
    }

    pub fn trust_group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.groups.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.read().len()
    }

    /// True when any configured group enforces membership
    pub fn require_verified(&self) -> bool {
        self.inner
            .groups
            .read()
            .values()
            .any(|g| g.config.enforce_membership)
    }

    /// Whether `host` belongs to at least one enabled trust group
    ///
    /// Never waits on the network. Each enabled group consulted gets a
    /// non-blocking refresh check.
    pub fn is_member(&self, host: &str, require_verified: bool) -> bool {
        let authority = match normalize(host, "https") {
            Ok(authority) => authority,
            Err(e) => {
                debug!(host = %host, error = %e, "Membership check for invalid host");
                return false;
            }
        };

        let now = Instant::now();
        let groups = self.inner.groups.read();
        let mut member = false;

        for (id, state) in groups.iter().filter(|(_, g)| g.config.enabled) {
            self.schedule_refresh(id, state, now);
            if !member {
                member = state
                    .usable_cache(now, &self.inner.settings)
                    .is_some_and(|cache| cache.contains(&authority, require_verified));
            }
        }

        member
    }

    /// Cached listings of enabled groups whose cache is within `max_stale`
    pub fn get_directory_listings(&self) -> Vec<DirectoryListing> {
        let now = Instant::now();
        let groups = self.inner.groups.read();
        let mut listings = Vec::new();

        for (id, state) in groups.iter().filter(|(_, g)| g.config.enabled) {
            self.schedule_refresh(id, state, now);
            if let Some(cache) = state.usable_cache(now, &self.inner.settings) {
                listings.extend(cache.listings.iter().cloned());
            }
        }

        listings
    }

    /// Refresh a group in the foreground
    ///
    /// Returns the number of member authorities now cached.
    pub async fn refresh_now(&self, trust_group_id: &str) -> Result<usize, RefreshError> {
        let flag = {
            let groups = self.inner.groups.read();
            let state = groups
                .get(trust_group_id)
                .ok_or_else(|| RefreshError::UnknownGroup(trust_group_id.to_string()))?;
            state.refreshing.clone()
        };

        let _guard = RefreshGuard::acquire(&flag)
            .ok_or_else(|| RefreshError::InProgress(trust_group_id.to_string()))?;
        self.refresh(trust_group_id).await
    }

    fn schedule_refresh(&self, id: &str, state: &GroupState, now: Instant) {
        if !state.needs_refresh(now, &self.inner.settings) {
            return;
        }
        let Some(guard) = RefreshGuard::acquire(&state.refreshing) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(trust_group = %id, "No async runtime, skipping background refresh");
            return;
        };

        let manager = self.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            let _guard = guard;
            if let Err(e) = manager.refresh(&id).await {
                warn!(trust_group = %id, error = %e, "Background trust group refresh failed");
            }
        });
    }

    async fn refresh(&self, id: &str) -> Result<usize, RefreshError> {
        let config = {
            let groups = self.inner.groups.read();
            let state = groups
                .get(id)
                .ok_or_else(|| RefreshError::UnknownGroup(id.to_string()))?;
            state.config.clone()
        };

        let endpoints: Vec<_> = config
            .directory_services
            .iter()
            .filter(|s| s.enabled)
            .collect();
        if endpoints.is_empty() {
            self.record_failure(id, &config);
            return Err(RefreshError::NoDirectoryServices(id.to_string()));
        }

        debug!(trust_group = %id, endpoints = endpoints.len(), "Refreshing trust group");

        let mut listings = Vec::new();
        let mut failures = 0usize;
        let mut last_error = String::new();

        for endpoint in endpoints {
            let fetch = self.inner.directory.fetch_listing(
                &endpoint.url,
                &config.keys,
                config.verification_policy,
            );
            match tokio::time::timeout(self.inner.settings.fetch_timeout, fetch).await {
                Ok(Ok(listing)) => {
                    debug!(
                        trust_group = %id,
                        url = %endpoint.url,
                        servers = listing.servers.len(),
                        verified = listing.verified,
                        "Fetched directory listing"
                    );
                    listings.push(listing);
                }
                Ok(Err(e)) => {
                    warn!(trust_group = %id, url = %endpoint.url, kind = e.kind(), error = %e, "Directory fetch failed");
                    failures += 1;
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(trust_group = %id, url = %endpoint.url, "Directory fetch timed out");
                    failures += 1;
                    last_error = "timed out".to_string();
                }
            }
        }

        if listings.is_empty() {
            self.record_failure(id, &config);
            return Err(RefreshError::AllFailed {
                group: id.to_string(),
                failures,
                last: last_error,
            });
        }

        let cache = MembershipCache::from_listings(listings);
        let members = cache.all.len();
        let verified_members = cache.verified.len();

        {
            let mut groups = self.inner.groups.write();
            match groups.get_mut(id) {
                Some(state) if Arc::ptr_eq(&state.config, &config) => {
                    state.cache = Arc::new(cache);
                    state.last_refresh = Some(Instant::now());
                    state.last_failure = None;
                    state.force_refresh = false;
                }
                _ => {
                    info!(trust_group = %id, "Discarding refresh of a replaced trust group configuration");
                    return Err(RefreshError::Superseded(id.to_string()));
                }
            }
        }

        info!(
            trust_group = %id,
            members,
            verified_members,
            failed_endpoints = failures,
            "Trust group membership refreshed"
        );
        Ok(members)
    }

    /// Only failures of the current configuration delay the next attempt
    fn record_failure(&self, id: &str, config: &Arc<TrustGroupConfig>) {
        if let Some(state) = self.inner.groups.write().get_mut(id) {
            if Arc::ptr_eq(&state.config, config) {
                state.last_failure = Some(Instant::now());
            }
        }
    }
}

impl std::fmt::Debug for TrustGroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustGroupManager")
            .field("groups", &self.trust_group_ids())
            .field("settings", &self.inner.settings)
            .finish()
    }
}
