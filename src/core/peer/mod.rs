//! Peer connections: one WebRTC connection per browser client.
//!
//! - `connection`: the [`Peer`] wrapping `RTCPeerConnection`, its tracks and
//!   its data channel
//! - `manager`: the [`PeerManager`] registry
//! - `outbox`: queue-until-open data-channel sender
//! - `sink`: outbound Opus track as an [`AudioSink`](crate::core::conversation::AudioSink)
//! - `sdp`, `candidate`: signaling helpers

pub mod candidate;
mod connection;
mod manager;
pub mod outbox;
pub mod sdp;
mod sink;

pub use candidate::{CandidateProtocol, CandidateType, IceCandidate};
pub use connection::{Peer, PeerConfig, transcript_message};
pub use manager::PeerManager;
pub use outbox::{DataChannelOutbox, DataChannelTransport};
pub use sdp::{opus_fmtp, pin_opus};
pub use sink::OpusTrackSink;
