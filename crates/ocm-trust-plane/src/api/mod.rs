//! API module for the trust plane server

pub mod error;
pub mod handlers;
pub mod middleware;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub key_id: String,
    pub signature_mode: String,
    pub trust_group_count: usize,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.signer.is_loaded(),
        key_id: state.signer.key_id().to_string(),
        signature_mode: state.verifier.mode().to_string(),
        trust_group_count: state.trust_groups.group_count(),
    })
}

/// Create the API router
///
/// Federated endpoints run the signature middleware first and the policy
/// gate second.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let federated = Router::new()
        .route("/ocm/peer", post(handlers::peer_identity))
        .route_layer(from_fn_with_state(state.policy.clone(), middleware::enforce_policy))
        .route_layer(from_fn_with_state(state.verifier.clone(), middleware::verify_signature));

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Discovery
        .route("/.well-known/ocm", get(handlers::well_known))
        // Federation endpoints
        .route("/v1/federation/directory", get(handlers::directory_listings))
        .merge(federated)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
