//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `signaling` - WebRTC signaling WebSocket

pub mod api;
pub mod signaling;

pub use signaling::signaling_handler;
