//! OpenAI Realtime session.
//!
//! Server-side turn detection is disabled in `session.update`; the
//! conversation loop closes turns by sending text, which maps to
//! `input_audio_buffer.commit` followed by `response.create`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use http::HeaderValue;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{
    OPENAI_INPUT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_SAMPLE_RATE, model_name, realtime_url,
    voice_name,
};
use super::messages::{ClientEvent, ConversationItem, InputAudioTranscription, ServerEvent, SessionConfig};
use crate::core::audio::resample_bytes;
use crate::core::realtime::RealtimeProvider;
use crate::core::realtime::base::{
    ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError, RealtimeResult,
    SessionEventStream, SessionInput, SpeechSession, TranscriptRole,
};
use crate::core::realtime::pump::EventPump;
use crate::core::realtime::transport::{self, WsReader, WsWriter};

/// Live OpenAI Realtime session.
pub struct OpenAIRealtime {
    writer: Arc<WsWriter>,
    pump: Arc<EventPump>,
    state: Arc<RwLock<ConnectionState>>,
    /// Audio appended since the last commit
    audio_pending: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl OpenAIRealtime {
    /// Connect and configure a session.
    pub async fn connect(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required for OpenAI Realtime".to_string(),
            ));
        }

        let url = realtime_url(config.endpoint.as_deref(), &config.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (writer, reader) = transport::open(request, config.connect_timeout()).await?;
        let writer = Arc::new(writer);

        writer
            .send_json(&ClientEvent::SessionUpdate {
                session: Self::session_config(&config),
            })
            .await?;

        let pump = Arc::new(EventPump::new());
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Self::read_loop(
            reader,
            pump.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        info!(model = %model_name(&config.model), "OpenAI Realtime session connected");

        Ok(Self {
            writer,
            pump,
            state,
            audio_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown,
            reader: Mutex::new(Some(handle)),
        })
    }

    fn session_config(config: &RealtimeConfig) -> SessionConfig {
        SessionConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: config.instructions.clone(),
            voice: Some(voice_name(config.voice.as_deref()).to_string()),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(InputAudioTranscription {
                model: OPENAI_INPUT_TRANSCRIPTION_MODEL.to_string(),
            }),
            turn_detection: None,
            temperature: config.temperature,
        }
    }

    async fn read_loop(
        mut reader: WsReader,
        pump: Arc<EventPump>,
        state: Arc<RwLock<ConnectionState>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = transport::next_json(&mut reader) => next,
            };

            match next {
                Some(Ok(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => Self::handle_server_event(event, &pump),
                    Err(e) => warn!("Failed to parse OpenAI server event: {}", e),
                },
                Some(Err(e)) => {
                    error!("OpenAI Realtime receive failed: {}", e);
                    *state.write() = ConnectionState::Failed;
                    pump.error(e);
                    break;
                }
                None => {
                    info!("OpenAI Realtime connection closed by provider");
                    break;
                }
            }
        }

        {
            let mut state = state.write();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Closed;
            }
        }
        pump.finish();
    }

    fn handle_server_event(event: ServerEvent, pump: &EventPump) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!("OpenAI Realtime session created: {}", session.id);
            }
            ServerEvent::Error { error } => {
                warn!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type, error.message
                );
                pump.error(RealtimeError::ProviderError(format!(
                    "{}: {}",
                    error.error_type, error.message
                )));
            }
            ServerEvent::TranscriptionCompleted { transcript } => {
                pump.transcript(TranscriptRole::User, &transcript, true);
            }
            ServerEvent::AudioDelta { item_id, delta } => match BASE64_STANDARD.decode(&delta) {
                Ok(data) => pump.audio(RealtimeAudioData {
                    data: Bytes::from(data),
                    sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
                    item_id,
                }),
                Err(e) => warn!("Failed to decode OpenAI audio delta: {}", e),
            },
            ServerEvent::AudioTranscriptDelta { delta } => {
                pump.transcript(TranscriptRole::Assistant, &delta, false);
            }
            ServerEvent::AudioTranscriptDone => {
                pump.transcript(TranscriptRole::Assistant, "", true);
            }
            ServerEvent::ResponseDone { response } => {
                debug!(response_id = ?response.id, status = ?response.status, "response done");
                if response.was_cancelled() {
                    pump.interrupted();
                } else {
                    pump.turn_complete();
                }
            }
            ServerEvent::Other => {}
        }
    }

    fn ensure_open(&self) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSession for OpenAIRealtime {
    async fn send(&self, input: SessionInput) -> RealtimeResult<()> {
        self.ensure_open()?;

        match input {
            SessionInput::Audio(chunk) => {
                let audio = resample_bytes(&chunk.data, chunk.sample_rate, OPENAI_REALTIME_SAMPLE_RATE);
                if audio.is_empty() {
                    return Ok(());
                }
                self.writer.send_json(&ClientEvent::audio_append(&audio)).await?;
                self.audio_pending.store(true, Ordering::SeqCst);
            }
            SessionInput::Text(text) => {
                if self.audio_pending.swap(false, Ordering::SeqCst) {
                    self.writer
                        .send_json(&ClientEvent::InputAudioBufferCommit)
                        .await?;
                }
                if !text.trim().is_empty() {
                    self.writer
                        .send_json(&ClientEvent::ConversationItemCreate {
                            item: ConversationItem::user_text(&text),
                        })
                        .await?;
                }
                self.writer.send_json(&ClientEvent::ResponseCreate).await?;
            }
        }

        Ok(())
    }

    fn receive(&self) -> RealtimeResult<SessionEventStream> {
        self.pump.take_stream()
    }

    async fn close(&self) -> RealtimeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pump.flush();
        self.shutdown.cancel();
        self.writer.close().await;

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                debug!("OpenAI reader task ended abnormally: {}", e);
            }
        }

        self.pump.finish();
        *self.state.write() = ConnectionState::Closed;
        info!("OpenAI Realtime session closed");
        Ok(())
    }

    fn provider(&self) -> RealtimeProvider {
        RealtimeProvider::OpenAI
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn input_sample_rate(&self) -> u32 {
        OPENAI_REALTIME_SAMPLE_RATE
    }

    fn output_sample_rate(&self) -> u32 {
        OPENAI_REALTIME_SAMPLE_RATE
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_key_required() {
        let result = OpenAIRealtime::connect(RealtimeConfig::default()).await;
        match result {
            Err(RealtimeError::AuthenticationFailed(msg)) => {
                assert!(msg.contains("API key is required"));
            }
            _ => panic!("Expected AuthenticationFailed error"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let config = RealtimeConfig {
            api_key: "sk-test".to_string(),
            endpoint: Some("ws://127.0.0.1:1".to_string()),
            connect_timeout_ms: Some(500),
            ..Default::default()
        };
        let result = OpenAIRealtime::connect(config).await;
        assert!(matches!(
            result,
            Err(RealtimeError::ConnectionFailed(_)) | Err(RealtimeError::Timeout(_))
        ));
    }

    #[test]
    fn test_session_config_uses_voice_and_instructions() {
        let config = RealtimeConfig {
            voice: Some("coral".to_string()),
            instructions: Some("You are a procurement manager.".to_string()),
            ..Default::default()
        };
        let session = OpenAIRealtime::session_config(&config);
        assert_eq!(session.voice.as_deref(), Some("coral"));
        assert_eq!(
            session.instructions.as_deref(),
            Some("You are a procurement manager.")
        );
        assert!(session.turn_detection.is_none());
        assert_eq!(
            session.input_audio_transcription.map(|t| t.model).as_deref(),
            Some(OPENAI_INPUT_TRANSCRIPTION_MODEL)
        );
    }
}
