//! Gateway error types
//!
//! Connection-level failures live here. Upstream model failures are
//! [`RealtimeError`]; segmentation notices are [`SegmentationWarning`].
//! [`GatewayError`] aggregates all of them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::core::audio::{CodecError, SegmentationWarning};
use crate::core::realtime::RealtimeError;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Malformed or unsupported signaling input. Fatal to the connection.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported signaling message: {0}")]
    UnsupportedMessage(String),

    #[error("Invalid ICE candidate '{candidate}': {reason}")]
    InvalidCandidate { candidate: String, reason: String },

    #[error("Invalid session description: {0}")]
    InvalidSdp(String),

    #[error("Candidate received before offer")]
    NoPeer,
}

impl SignalingError {
    /// Stable code sent to the client in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::MalformedMessage(_) => "malformed_message",
            SignalingError::UnsupportedMessage(_) => "unsupported_message",
            SignalingError::InvalidCandidate { .. } => "invalid_candidate",
            SignalingError::InvalidSdp(_) => "invalid_sdp",
            SignalingError::NoPeer => "no_peer",
        }
    }
}

/// ICE, media or data-channel failure. Fatal to the connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Media codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Peer connection {0}")]
    ConnectionLost(String),

    #[error("Data channel error: {0}")]
    DataChannel(String),

    #[error("Peer is closed")]
    PeerClosed,

    #[error("ICE gathering timed out")]
    GatheringTimeout,
}

/// Top-level error for the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Segmentation(#[from] SegmentationWarning),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer limit of {0} reached")]
    PeerLimitReached(usize),

    #[error("Collaborator request failed: {0}")]
    Collaborator(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Signaling(_) => StatusCode::BAD_REQUEST,
            GatewayError::PeerLimitReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Realtime(_) | GatewayError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<webrtc::Error> for GatewayError {
    fn from(err: webrtc::Error) -> Self {
        GatewayError::Transport(TransportError::WebRtc(err))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status_code(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_error_codes() {
        let err = SignalingError::InvalidCandidate {
            candidate: "candidate:x".into(),
            reason: "missing port".into(),
        };
        assert_eq!(err.code(), "invalid_candidate");
        assert_eq!(
            err.to_string(),
            "Invalid ICE candidate 'candidate:x': missing port"
        );
    }

    #[test]
    fn test_gateway_error_conversions() {
        let err: GatewayError = SignalingError::NoPeer.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Candidate received before offer");

        let err: GatewayError = RealtimeError::SendFailed("broken pipe".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: GatewayError = TransportError::PeerClosed.into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            GatewayError::PeerLimitReached(4).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
