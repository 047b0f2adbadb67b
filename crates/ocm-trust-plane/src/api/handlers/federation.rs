//! Federation directory view

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use ocm_trust_core::DirectoryListing;

use crate::api::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct DirectoryResponse {
    /// Whether membership only counts verified listings
    pub require_verified: bool,
    pub listings: Vec<DirectoryListing>,
}

/// GET /v1/federation/directory
///
/// Cached listings of enabled trust groups. Never waits on a refresh.
pub async fn directory_listings(State(state): State<Arc<AppState>>) -> Json<DirectoryResponse> {
    Json(DirectoryResponse {
        require_verified: state.trust_groups.require_verified(),
        listings: state.trust_groups.get_directory_listings(),
    })
}
