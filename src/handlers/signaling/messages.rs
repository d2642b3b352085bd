//! Signaling WebSocket message types
//!
//! JSON messages tagged by `type`. The browser sends its offer and trickled
//! candidates; the gateway answers once with the Opus-pinned SDP.

use serde::{Deserialize, Serialize};

use crate::errors::SignalingError;

/// Maximum allowed size for an SDP offer (64 KB)
pub const MAX_SDP_SIZE: usize = 64 * 1024;

/// Maximum allowed size for a candidate line (1 KB)
pub const MAX_CANDIDATE_SIZE: usize = 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingIncomingMessage {
    /// SDP offer opening (or replacing) the peer connection
    Offer {
        sdp: String,
        /// Conversation session the persona is looked up for
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Trickled ICE candidate. An empty candidate ends the candidate list.
    Candidate {
        #[serde(default)]
        candidate: String,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
    },

    /// Client is done; the peer is torn down
    Close,
}

const MESSAGE_TYPES: [&str; 3] = ["offer", "candidate", "close"];

impl SignalingIncomingMessage {
    /// Parse a text frame. Unknown `type` values are unsupported, anything
    /// else that does not deserialize is malformed.
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SignalingError::MalformedMessage(format!("Invalid JSON: {e}")))?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) if !MESSAGE_TYPES.contains(&kind) => {
                return Err(SignalingError::UnsupportedMessage(kind.to_string()));
            }
            None => {
                return Err(SignalingError::MalformedMessage(
                    "missing 'type' field".to_string(),
                ));
            }
            _ => {}
        }

        let message: Self = serde_json::from_value(value)
            .map_err(|e| SignalingError::MalformedMessage(e.to_string()))?;
        message.validate_size()?;
        Ok(message)
    }

    pub fn validate_size(&self) -> Result<(), SignalingError> {
        match self {
            SignalingIncomingMessage::Offer { sdp, .. } if sdp.len() > MAX_SDP_SIZE => {
                Err(SignalingError::MalformedMessage(format!(
                    "SDP too large: {} bytes (max: {} bytes)",
                    sdp.len(),
                    MAX_SDP_SIZE
                )))
            }
            SignalingIncomingMessage::Candidate { candidate, .. }
                if candidate.len() > MAX_CANDIDATE_SIZE =>
            {
                Err(SignalingError::MalformedMessage(format!(
                    "Candidate too large: {} bytes (max: {} bytes)",
                    candidate.len(),
                    MAX_CANDIDATE_SIZE
                )))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingOutgoingMessage {
    Answer {
        peer_id: String,
        sdp: String,
    },

    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl From<&SignalingError> for SignalingOutgoingMessage {
    fn from(err: &SignalingError) -> Self {
        SignalingOutgoingMessage::Error {
            code: Some(err.code().to_string()),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Instructions for the socket writer task
pub enum SignalingRoute {
    Outgoing(SignalingOutgoingMessage),
    Close,
}
