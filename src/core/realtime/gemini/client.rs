//! Gemini Live session.
//!
//! Automatic activity detection is disabled at setup. The first audio chunk of
//! a turn opens an activity with `activityStart`; end-of-turn closes it with
//! `activityEnd` and, when the text is non-empty, a `clientContent` turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{
    GEMINI_INPUT_SAMPLE_RATE, GEMINI_OUTPUT_SAMPLE_RATE, input_mime_type, live_url,
    model_resource, rate_from_mime, voice_name,
};
use super::messages::{
    AutomaticActivityDetection, ClientMessage, Content, Empty, GenerationConfig,
    PrebuiltVoiceConfig, RealtimeInputConfig, ServerContent, ServerMessage, Setup, SpeechConfig,
    VoiceConfig,
};
use crate::core::audio::resample_bytes;
use crate::core::realtime::RealtimeProvider;
use crate::core::realtime::base::{
    ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError, RealtimeResult,
    SessionEventStream, SessionInput, SpeechSession, TranscriptRole,
};
use crate::core::realtime::pump::EventPump;
use crate::core::realtime::transport::{self, WsReader, WsWriter};

/// Live Gemini session.
pub struct GeminiLive {
    writer: Arc<WsWriter>,
    pump: Arc<EventPump>,
    state: Arc<RwLock<ConnectionState>>,
    /// Whether an `activityStart` is awaiting its `activityEnd`.
    activity_open: tokio::sync::Mutex<bool>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl GeminiLive {
    /// Connect, send setup and wait for `setupComplete`.
    pub async fn connect(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required for Gemini Live".to_string(),
            ));
        }

        let deadline = Instant::now() + config.connect_timeout();
        let url = live_url(config.endpoint.as_deref(), &config.api_key);
        let (writer, mut reader) = transport::open(url, config.connect_timeout()).await?;

        writer
            .send_json(&ClientMessage::Setup(Self::setup(&config)))
            .await?;

        Self::await_setup_complete(&mut reader, deadline).await?;

        let writer = Arc::new(writer);
        let pump = Arc::new(EventPump::new());
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Self::read_loop(
            reader,
            pump.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        info!(model = %model_resource(&config.model), "Gemini Live session connected");

        Ok(Self {
            writer,
            pump,
            state,
            activity_open: tokio::sync::Mutex::new(false),
            closed: AtomicBool::new(false),
            shutdown,
            reader: Mutex::new(Some(handle)),
        })
    }

    fn setup(config: &RealtimeConfig) -> Setup {
        Setup {
            model: model_resource(&config.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name(config.voice.as_deref()).to_string(),
                        },
                    },
                },
                temperature: config.temperature,
            },
            system_instruction: config
                .instructions
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| Content::text(None, text)),
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection { disabled: true },
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        }
    }

    async fn await_setup_complete(
        reader: &mut WsReader,
        deadline: Instant,
    ) -> RealtimeResult<()> {
        loop {
            let next = timeout_at(deadline.into(), transport::next_json(reader))
                .await
                .map_err(|_| RealtimeError::Timeout("Gemini setup not acknowledged".to_string()))?;

            match next {
                Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) if message.setup_complete.is_some() => {
                        debug!("Gemini setup complete");
                        return Ok(());
                    }
                    Ok(_) => debug!("Ignoring Gemini message before setupComplete"),
                    Err(e) => warn!("Failed to parse Gemini message during setup: {}", e),
                },
                Some(Err(e)) => return Err(RealtimeError::ConnectionFailed(e.to_string())),
                None => {
                    return Err(RealtimeError::ConnectionFailed(
                        "Gemini closed the connection during setup".to_string(),
                    ));
                }
            }
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
                Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => Self::handle_server_message(message, &pump),
                    Err(e) => warn!("Failed to parse Gemini server message: {}", e),
                },
                Some(Err(e)) => {
                    error!("Gemini Live receive failed: {}", e);
                    *state.write() = ConnectionState::Failed;
                    pump.error(e);
                    break;
                }
                None => {
                    info!("Gemini Live connection closed by provider");
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

    fn handle_server_message(message: ServerMessage, pump: &EventPump) {
        if let Some(go_away) = message.go_away {
            warn!(time_left = ?go_away.time_left, "Gemini Live announced disconnect");
        }
        if let Some(content) = message.server_content {
            Self::handle_server_content(content, pump);
        }
    }

    fn handle_server_content(content: ServerContent, pump: &EventPump) {
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            pump.transcript(TranscriptRole::User, &text, false);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                match BASE64_STANDARD.decode(&blob.data) {
                    Ok(data) => pump.audio(RealtimeAudioData {
                        data: Bytes::from(data),
                        sample_rate: rate_from_mime(&blob.mime_type)
                            .unwrap_or(GEMINI_OUTPUT_SAMPLE_RATE),
                        item_id: None,
                    }),
                    Err(e) => warn!("Failed to decode Gemini audio: {}", e),
                }
            }
        }

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            pump.transcript(TranscriptRole::Assistant, &text, false);
        }

        if content.interrupted {
            pump.interrupted();
        }
        if content.turn_complete {
            pump.turn_complete();
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
impl SpeechSession for GeminiLive {
    async fn send(&self, input: SessionInput) -> RealtimeResult<()> {
        self.ensure_open()?;

        match input {
            SessionInput::Audio(chunk) => {
                let audio = resample_bytes(&chunk.data, chunk.sample_rate, GEMINI_INPUT_SAMPLE_RATE);
                if audio.is_empty() {
                    return Ok(());
                }
                let mut activity_open = self.activity_open.lock().await;
                if !*activity_open {
                    self.writer.send_json(&ClientMessage::activity_start()).await?;
                    *activity_open = true;
                }
                self.writer
                    .send_json(&ClientMessage::audio(&audio, input_mime_type()))
                    .await?;
            }
            SessionInput::Text(text) => {
                let mut activity_open = self.activity_open.lock().await;
                if *activity_open {
                    self.writer.send_json(&ClientMessage::activity_end()).await?;
                    *activity_open = false;
                }
                if !text.trim().is_empty() {
                    self.writer.send_json(&ClientMessage::user_turn(&text)).await?;
                }
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
                debug!("Gemini reader task ended abnormally: {}", e);
            }
        }

        self.pump.finish();
        *self.state.write() = ConnectionState::Closed;
        info!("Gemini Live session closed");
        Ok(())
    }

    fn provider(&self) -> RealtimeProvider {
        RealtimeProvider::Gemini
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn input_sample_rate(&self) -> u32 {
        GEMINI_INPUT_SAMPLE_RATE
    }

    fn output_sample_rate(&self) -> u32 {
        GEMINI_OUTPUT_SAMPLE_RATE
    }
}

impl Drop for GeminiLive {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::SessionEvent;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_api_key_required() {
        let result = GeminiLive::connect(RealtimeConfig::default()).await;
        assert!(matches!(result, Err(RealtimeError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_setup_skips_blank_instructions() {
        let config = RealtimeConfig {
            instructions: Some("   ".to_string()),
            voice: Some("aoede".to_string()),
            ..Default::default()
        };
        let setup = GeminiLive::setup(&config);
        assert!(setup.system_instruction.is_none());
        assert_eq!(
            setup
                .generation_config
                .speech_config
                .voice_config
                .prebuilt_voice_config
                .voice_name,
            "Aoede"
        );
    }

    #[tokio::test]
    async fn test_server_content_feeds_pump() {
        let pump = EventPump::new();
        let mut events = pump.take_stream().unwrap();

        let message: ServerMessage = serde_json::from_str(
            r#"{"serverContent": {
                "inputTranscription": {"text": "How much is it?"},
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAABAA=="}}]},
                "outputTranscription": {"text": "Too much. "},
                "turnComplete": true
            }}"#,
        )
        .unwrap();
        GeminiLive::handle_server_message(message, &pump);
        pump.finish();

        let mut collected = Vec::new();
        while let Some(event) = events.next().await {
            collected.push(event.unwrap());
        }

        assert!(matches!(&collected[0], SessionEvent::Transcript(t) if t.role == TranscriptRole::User && t.text == "How much is it?"));
        assert!(matches!(&collected[1], SessionEvent::Audio(a) if a.sample_rate == 24000 && a.data.len() == 4));
        assert!(matches!(&collected[2], SessionEvent::Transcript(t) if t.role == TranscriptRole::Assistant && t.text == "Too much."));
        assert!(matches!(collected[3], SessionEvent::TurnComplete));
        assert_eq!(collected.len(), 4);
    }
}
