//! OpenAI Realtime API session.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.
//!
//! # Turn Handling
//!
//! Server VAD is off. Audio is appended as it arrives and the gateway closes
//! each user turn with `input_audio_buffer.commit` + `response.create`.
//! A `response.done` with status `cancelled` is reported as an interruption.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    OPENAI_DEFAULT_MODEL, OPENAI_DEFAULT_VOICE, OPENAI_INPUT_TRANSCRIPTION_MODEL,
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OPENAI_VOICES, model_name, realtime_url,
    voice_name,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig};
