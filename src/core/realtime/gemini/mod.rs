//! Gemini Live API session.
//!
//! Input audio is PCM16 at 16kHz, output PCM16 at 24kHz. The gateway owns
//! turn-taking: automatic activity detection is switched off and each user
//! turn is bracketed with `activityStart` / `activityEnd`.

mod client;
mod config;
mod messages;

pub use client::GeminiLive;
pub use config::{
    GEMINI_DEFAULT_MODEL, GEMINI_DEFAULT_VOICE, GEMINI_INPUT_SAMPLE_RATE, GEMINI_LIVE_URL,
    GEMINI_OUTPUT_SAMPLE_RATE, GEMINI_VOICES,
};
pub use messages::{ClientMessage, ServerMessage};
