//! Signaling WebSocket
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **offer** `{sdp, session_id?}`: open or replace the peer connection
//! - **candidate** `{candidate, sdpMid?, sdpMLineIndex?}`: trickled ICE;
//!   an empty candidate ends the list
//! - **close**: tear the peer down
//!
//! ## Server → Client
//!
//! - **answer** `{peer_id, sdp}`: Opus-only answer
//! - **error** `{code?, message}`: sent before the socket is closed
//!
//! Any malformed or unsupported message ends the connection.

mod handler;
pub mod messages;

pub use crate::core::peer::{IceCandidate, pin_opus};
pub use handler::{SignalingQuery, signaling_handler};
