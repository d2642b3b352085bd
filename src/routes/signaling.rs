//! Signaling WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::signaling::signaling_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the signaling WebSocket router
///
/// # Endpoint
///
/// `GET /signaling?peer_id=..&session_id=..` - WebSocket upgrade
///
/// # Example
///
/// ```json
/// // Client sends its offer
/// {"type": "offer", "sdp": "v=0\r\n...", "session_id": "rehearsal-42"}
///
/// // Server answers with Opus pinned
/// {"type": "answer", "peer_id": "...", "sdp": "v=0\r\n..."}
///
/// // Client trickles candidates, then an empty one
/// {"type": "candidate", "candidate": "candidate:1 1 udp ...", "sdpMid": "0", "sdpMLineIndex": 0}
/// {"type": "candidate", "candidate": ""}
/// ```
pub fn create_signaling_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signaling", get(signaling_handler))
        .layer(TraceLayer::new_for_http())
}
