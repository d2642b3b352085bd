//! Peer limit middleware for the signaling endpoint
//!
//! Each signaling socket owns at most one peer, so the upgrade is refused
//! once `max_peers` peers are live.
//!
//! # Example
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/signaling", get(signaling_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         peer_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::state::AppState;

/// Returns 503 for WebSocket upgrades while the peer limit is reached.
/// Other requests pass through.
pub async fn peer_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade || !state.peer_limit_reached() {
        return next.run(request).await;
    }

    let max = state.config.max_peers.unwrap_or_default();
    tracing::warn!(
        max_peers = max,
        live_peers = state.peers.len(),
        "Rejecting signaling connection: peer limit reached"
    );
    GatewayError::PeerLimitReached(max).into_response()
}
