pub mod api;
pub mod signaling;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::peer_limit_middleware;
use crate::state::AppState;

/// Health and signaling routes with state applied.
pub fn create_app(state: Arc<AppState>) -> Router {
    let signaling_routes = signaling::create_signaling_router().layer(
        middleware::from_fn_with_state(state.clone(), peer_limit_middleware),
    );

    api::create_api_router()
        .merge(signaling_routes)
        .with_state(state)
}
