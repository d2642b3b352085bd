//! Base traits and types for streaming speech-model sessions.
//!
//! A [`SpeechSession`] is one live connection to an upstream provider. Every
//! provider exposes the same three operations: `send`, `receive` and `close`.
//! Turn-taking is not the session's concern; it only translates between the
//! provider's wire protocol and [`SessionInput`] / [`SessionEvent`].
//!
//! # Audio Format
//!
//! All audio crossing this boundary is PCM 16-bit signed little-endian mono,
//! tagged with its sample rate. Sessions resample input to the provider rate.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core::audio::AudioChunk;

use super::RealtimeProvider;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during speech-model sessions.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Sending to the provider failed
    #[error("Upstream send failed: {0}")]
    SendFailed(String),

    /// Receiving from the provider failed
    #[error("Upstream receive failed: {0}")]
    ReceiveFailed(String),

    /// Provider-specific error reported in-band
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The event stream was already taken
    #[error("Event stream already consumed")]
    StreamConsumed,
}

impl RealtimeError {
    /// Whether the session can no longer be used at all.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            RealtimeError::NotConnected
                | RealtimeError::ConnectionFailed(_)
                | RealtimeError::AuthenticationFailed(_)
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Base configuration for speech-model sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice name for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions seeding persona and context
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Override of the provider WebSocket endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Time allowed for the connection handshake (ms)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl RealtimeConfig {
    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        if instructions.is_some() {
            self.instructions = instructions;
        }
        self
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms.unwrap_or(10_000))
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Closed by the caller or the provider
    Closed,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Session Input / Output
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Sentence-aligned transcript text from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub role: TranscriptRole,
    pub text: String,
}

/// Audio produced by the model.
#[derive(Debug, Clone)]
pub struct RealtimeAudioData {
    /// Raw audio bytes (PCM 16-bit, mono, little-endian)
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Item ID from the provider
    pub item_id: Option<String>,
}

/// Input accepted by [`SpeechSession::send`].
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Text closes the user's turn. An empty string is a bare end-of-turn.
    Text(String),
    /// User audio at any sample rate.
    Audio(AudioChunk),
}

impl SessionInput {
    pub fn end_of_turn() -> Self {
        SessionInput::Text(String::new())
    }
}

/// One element of the session's receive stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Audio(RealtimeAudioData),
    Transcript(TranscriptSegment),
    TurnComplete,
    Interrupted,
}

/// Stream returned by [`SpeechSession::receive`]. Ends when upstream closes.
pub type SessionEventStream = BoxStream<'static, RealtimeResult<SessionEvent>>;

// =============================================================================
// Base Trait
// =============================================================================

/// One live streaming connection to a speech model.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let session = OpenAIRealtime::connect(config).await?;
/// let mut events = session.receive()?;
///
/// session.send(SessionInput::Audio(chunk)).await?;
/// session.send(SessionInput::end_of_turn()).await?;
///
/// while let Some(event) = events.next().await {
///     match event? {
///         SessionEvent::Audio(audio) => play(audio),
///         SessionEvent::TurnComplete => break,
///         _ => {}
///     }
/// }
/// session.close().await?;
/// ```
#[async_trait]
pub trait SpeechSession: Send + Sync {
    /// Send text or audio upstream.
    ///
    /// Fails with [`RealtimeError::SendFailed`] on transport failure.
    async fn send(&self, input: SessionInput) -> RealtimeResult<()>;

    /// Take the event stream. Only the first call succeeds.
    fn receive(&self) -> RealtimeResult<SessionEventStream>;

    /// Close the session, flushing buffered transcript text into the event
    /// stream first. Safe to call more than once.
    async fn close(&self) -> RealtimeResult<()>;

    fn provider(&self) -> RealtimeProvider;

    fn connection_state(&self) -> ConnectionState;

    /// Sample rate the provider expects for input audio.
    fn input_sample_rate(&self) -> u32;

    /// Sample rate of audio in [`SessionEvent::Audio`].
    fn output_sample_rate(&self) -> u32;
}

/// Shared handle to a live session.
pub type SharedSpeechSession = Arc<dyn SpeechSession>;

/// Opens sessions. The conversation loop gets one of these instead of a
/// concrete provider.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session seeded with `instructions`.
    async fn connect(&self, instructions: Option<String>) -> RealtimeResult<SharedSpeechSession>;

    /// Input sample rate of sessions this connector opens.
    fn input_sample_rate(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_transcript_role_serde() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(
            serde_json::to_string(&TranscriptRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::SendFailed("socket closed".to_string());
        assert_eq!(err.to_string(), "Upstream send failed: socket closed");
        assert_eq!(RealtimeError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_session_fatal_errors() {
        assert!(RealtimeError::NotConnected.is_session_fatal());
        assert!(!RealtimeError::SendFailed("x".into()).is_session_fatal());
        assert!(!RealtimeError::Timeout("x".into()).is_session_fatal());
    }

    #[test]
    fn test_config_instructions_override() {
        let config = RealtimeConfig {
            instructions: Some("default".to_string()),
            ..Default::default()
        };
        let kept = config.clone().with_instructions(None);
        assert_eq!(kept.instructions.as_deref(), Some("default"));
        let replaced = config.with_instructions(Some("persona".to_string()));
        assert_eq!(replaced.instructions.as_deref(), Some("persona"));
    }

    #[test]
    fn test_end_of_turn_is_empty_text() {
        assert!(matches!(SessionInput::end_of_turn(), SessionInput::Text(t) if t.is_empty()));
    }
}
