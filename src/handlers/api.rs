use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    /// Live peer connections
    pub peers: usize,
    pub uptime_secs: u64,
}

/// Health check, no auth.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.config.default_provider.to_string(),
        peers: state.peers.len(),
        uptime_secs: state.uptime_secs(),
    })
}
