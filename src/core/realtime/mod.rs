//! Streaming speech-model sessions.
//!
//! This module hides the provider wire protocols behind [`SpeechSession`]:
//! send audio or text, receive a stream of audio, sentence-aligned
//! transcripts, turn completions and interruptions.
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime API** - PCM16 at 24kHz in both directions
//! - **Gemini Live** - PCM16 at 16kHz in, 24kHz out
//!
//! # Example
//!
//! ```rust,ignore
//! use rehearsal_gateway::core::realtime::{connect_session, RealtimeConfig, RealtimeProvider};
//!
//! let config = RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4o-realtime-preview".to_string(),
//!     voice: Some("alloy".to_string()),
//!     ..Default::default()
//! };
//!
//! let session = connect_session(RealtimeProvider::OpenAI, config).await?;
//! let events = session.receive()?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod base;
pub mod gemini;
pub mod openai;
mod pump;
mod transport;

pub use base::{
    ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError, RealtimeResult,
    SessionConnector, SessionEvent, SessionEventStream, SessionInput, SharedSpeechSession,
    SpeechSession, TranscriptRole, TranscriptSegment,
};
pub use gemini::GeminiLive;
pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OpenAIRealtime};
pub use pump::EventPump;

/// Supported speech-model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
    /// Google Gemini Live
    Gemini,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(RealtimeProvider::OpenAI),
            "gemini" | "gemini-live" | "gemini_live" | "google" => Some(RealtimeProvider::Gemini),
            _ => None,
        }
    }

    /// Input sample rate the provider expects.
    pub fn input_sample_rate(&self) -> u32 {
        match self {
            RealtimeProvider::OpenAI => openai::OPENAI_REALTIME_SAMPLE_RATE,
            RealtimeProvider::Gemini => gemini::GEMINI_INPUT_SAMPLE_RATE,
        }
    }

    /// Sample rate of the audio the provider produces.
    pub fn output_sample_rate(&self) -> u32 {
        match self {
            RealtimeProvider::OpenAI => openai::OPENAI_REALTIME_SAMPLE_RATE,
            RealtimeProvider::Gemini => gemini::GEMINI_OUTPUT_SAMPLE_RATE,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
            RealtimeProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for RealtimeProvider {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            RealtimeError::InvalidConfiguration(format!(
                "Unsupported realtime provider: {s}. Supported providers: {}",
                get_supported_realtime_providers().join(", ")
            ))
        })
    }
}

/// Open a session with `provider`.
pub async fn connect_session(
    provider: RealtimeProvider,
    config: RealtimeConfig,
) -> RealtimeResult<SharedSpeechSession> {
    let session: SharedSpeechSession = match provider {
        RealtimeProvider::OpenAI => Arc::new(OpenAIRealtime::connect(config).await?),
        RealtimeProvider::Gemini => Arc::new(GeminiLive::connect(config).await?),
    };
    Ok(session)
}

/// [`SessionConnector`] for a configured provider.
#[derive(Debug, Clone)]
pub struct ProviderConnector {
    provider: RealtimeProvider,
    config: RealtimeConfig,
}

impl ProviderConnector {
    pub fn new(provider: RealtimeProvider, config: RealtimeConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> RealtimeProvider {
        self.provider
    }
}

#[async_trait]
impl SessionConnector for ProviderConnector {
    async fn connect(&self, instructions: Option<String>) -> RealtimeResult<SharedSpeechSession> {
        let config = self.config.clone().with_instructions(instructions);
        connect_session(self.provider, config).await
    }

    fn input_sample_rate(&self) -> u32 {
        self.provider.input_sample_rate()
    }
}

/// Get list of supported realtime providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai", "gemini"]
}
