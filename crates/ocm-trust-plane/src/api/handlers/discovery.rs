//! Local discovery document

use axum::{extract::State, Json};
use std::sync::Arc;

use ocm_trust_directory::discovery::HTTP_SIG_CAPABILITY;
use ocm_trust_directory::{DiscoveryDocument, PublishedKey};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// OCM API version advertised to peers
pub const OCM_API_VERSION: &str = "1.2.0";

/// GET /.well-known/ocm
///
/// Publishes this server's key so peers can verify its signed requests.
pub async fn well_known(State(state): State<Arc<AppState>>) -> Result<Json<DiscoveryDocument>, ApiError> {
    let public_key_pem = state
        .signer
        .public_key_pem()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(DiscoveryDocument {
        enabled: true,
        api_version: OCM_API_VERSION.to_string(),
        end_point: format!("{}/ocm", state.config.public_origin),
        provider: Some(state.config.provider.clone()),
        capabilities: vec![HTTP_SIG_CAPABILITY.to_string()],
        public_key: Some(PublishedKey {
            key_id: state.signer.key_id().to_string(),
            public_key_pem,
        }),
    }))
}
