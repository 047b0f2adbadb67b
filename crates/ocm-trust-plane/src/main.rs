//! Trust Plane Server Binary
//!
//! Runs the OCM trust plane HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ocm_trust_core::SigningKeyManager;
use ocm_trust_directory::{DirectoryClient, OcmDiscoveryClient, ReqwestHttpClient};
use ocm_trust_plane::{
    create_router, AppState, PlaneConfig, PolicyConfig, PolicyEngine, ServerConfig,
    SignatureVerifier, TrustGroupConfig, TrustGroupManager,
};

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ocm-trust-plane: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("ocm-trust-plane: failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Trust plane failed");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Signing key
    let signer = Arc::new(SigningKeyManager::new(&config.public_origin, config.key_path.clone())?);
    signer.load_or_generate()?;

    // Outbound HTTP shared by directory fetches and discovery
    let http = Arc::new(ReqwestHttpClient::new(config.fetch_timeout)?);

    // Trust groups
    let trust_groups = TrustGroupManager::new(DirectoryClient::new(http.clone()), config.manager_settings());
    for path in &config.group_configs {
        trust_groups.add_trust_group(TrustGroupConfig::from_file(path)?);
    }

    // Policy
    let policy_config = match &config.policy_file {
        Some(path) => PolicyConfig::from_file(path)?,
        None => {
            warn!("No policy file configured, peer policy enforcement is disabled");
            PolicyConfig::default()
        }
    };
    let policy = Arc::new(PolicyEngine::new(policy_config).with_membership(Arc::new(trust_groups.clone())));

    // Inbound signatures
    let verifier = Arc::new(
        SignatureVerifier::new(config.signature_mode, Arc::new(OcmDiscoveryClient::new(http)))
            .allow_mismatch(config.allow_mismatch)
            .discovery_fail_open(config.discovery_fail_open),
    );

    info!(
        key_id = %signer.key_id(),
        signature_mode = %config.signature_mode,
        trust_groups = trust_groups.group_count(),
        require_verified = trust_groups.require_verified(),
        port = config.port,
        "Starting trust plane server"
    );

    // Warm membership caches without delaying startup
    for id in trust_groups.trust_group_ids() {
        let manager = trust_groups.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.refresh_now(&id).await {
                warn!(trust_group = %id, error = %e, "Initial trust group refresh failed");
            }
        });
    }

    if let Some(path) = config.policy_file.clone() {
        spawn_policy_reload(path, policy.clone());
    }

    let state = Arc::new(AppState {
        signer,
        trust_groups,
        policy,
        verifier,
        config: PlaneConfig::new(&config.public_origin),
    });
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Trust plane listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Re-read the policy file on SIGHUP; a bad file keeps the current policy
#[cfg(unix)]
fn spawn_policy_reload(path: PathBuf, engine: Arc<PolicyEngine>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, policy reload disabled");
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match PolicyConfig::from_file(&path) {
                Ok(policy) => engine.update_policy(policy),
                Err(e) => warn!(path = %path.display(), error = %e, "Policy reload failed, keeping current policy"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_policy_reload(_path: PathBuf, _engine: Arc<PolicyEngine>) {}
