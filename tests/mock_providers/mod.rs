//! Scripted speech sessions and sinks for driving the conversation loop
//! without a provider.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rehearsal_gateway::core::AudioChunk;
use rehearsal_gateway::core::audio::{samples_per_frame, samples_to_bytes};
use rehearsal_gateway::core::conversation::AudioSink;
use rehearsal_gateway::core::events::{Event, EventCategory, EventManager, handler};
use rehearsal_gateway::core::realtime::{
    ConnectionState, EventPump, RealtimeAudioData, RealtimeError, RealtimeProvider,
    RealtimeResult, SessionConnector, SessionEventStream, SessionInput, SharedSpeechSession,
    SpeechSession, TranscriptRole,
};
use rehearsal_gateway::errors::TransportError;

pub const SESSION_INPUT_RATE: u32 = 16000;
pub const SESSION_OUTPUT_RATE: u32 = 24000;

// =============================================================================
// Audio helpers
// =============================================================================

/// Square wave loud enough to count as voice.
pub fn tone(ms: u32, rate: u32) -> Bytes {
    let samples: Vec<i16> = (0..samples_per_frame(rate, ms))
        .map(|i| if (i / 8) % 2 == 0 { 6000 } else { -6000 })
        .collect();
    samples_to_bytes(&samples)
}

pub fn silence(ms: u32, rate: u32) -> Bytes {
    let samples = vec![0i16; samples_per_frame(rate, ms)];
    samples_to_bytes(&samples)
}

/// Push `total_ms` of audio in 20 ms chunks, the way the peer delivers it.
pub async fn feed(tx: &mpsc::Sender<AudioChunk>, make: fn(u32, u32) -> Bytes, total_ms: u32, rate: u32) {
    for _ in 0..(total_ms / 20) {
        tx.send(AudioChunk::new(make(20, rate), rate))
            .await
            .expect("loop dropped inbound audio");
    }
}

/// Poll `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Scripted session
// =============================================================================

/// A session whose event stream is driven by the test through [`EventPump`].
pub struct ScriptedSession {
    pump: EventPump,
    inputs: Mutex<Vec<SessionInput>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            pump: EventPump::new(),
            inputs: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pump(&self) -> &EventPump {
        &self.pump
    }

    /// Model speech of `ms` milliseconds at the session output rate.
    pub fn say_audio(&self, ms: u32) {
        self.pump.audio(RealtimeAudioData {
            data: tone(ms, SESSION_OUTPUT_RATE),
            sample_rate: SESSION_OUTPUT_RATE,
            item_id: None,
        });
    }

    pub fn say_text(&self, role: TranscriptRole, fragment: &str) {
        self.pump.transcript(role, fragment, false);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn audio_inputs(&self) -> usize {
        self.inputs
            .lock()
            .iter()
            .filter(|i| matches!(i, SessionInput::Audio(_)))
            .count()
    }

    /// Text inputs, each one closing a user turn.
    pub fn turn_ends(&self) -> Vec<String> {
        self.inputs
            .lock()
            .iter()
            .filter_map(|i| match i {
                SessionInput::Text(text) => Some(text.clone()),
                SessionInput::Audio(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl SpeechSession for ScriptedSession {
    async fn send(&self, input: SessionInput) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RealtimeError::SendFailed("scripted failure".to_string()));
        }
        self.inputs.lock().push(input);
        Ok(())
    }

    fn receive(&self) -> RealtimeResult<SessionEventStream> {
        self.pump.take_stream()
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.pump.finish();
        Ok(())
    }

    fn provider(&self) -> RealtimeProvider {
        RealtimeProvider::OpenAI
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }

    fn input_sample_rate(&self) -> u32 {
        SESSION_INPUT_RATE
    }

    fn output_sample_rate(&self) -> u32 {
        SESSION_OUTPUT_RATE
    }
}

/// Hands out one fresh [`ScriptedSession`] per connect.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    instructions: Mutex<Vec<Option<String>>>,
    fail: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let connector = Self::default();
        connector.fail.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn connects(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Option<Arc<ScriptedSession>> {
        self.sessions.lock().get(index).cloned()
    }

    pub fn last_instructions(&self) -> Option<String> {
        self.instructions.lock().last().cloned().flatten()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, instructions: Option<String>) -> RealtimeResult<SharedSpeechSession> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed("mock refused".to_string()));
        }
        self.instructions.lock().push(instructions);
        let session = Arc::new(ScriptedSession::new());
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    fn input_sample_rate(&self) -> u32 {
        SESSION_INPUT_RATE
    }
}

// =============================================================================
// Sink and event capture
// =============================================================================

/// Sink that counts paced frames.
pub struct RecordingSink {
    rate: u32,
    frames: AtomicUsize,
    bytes: AtomicUsize,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl RecordingSink {
    pub fn new(rate: u32) -> Arc<Self> {
        Arc::new(Self {
            rate,
            frames: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
        })
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Makes the next write panic inside the play task.
    pub fn panic_writes(&self) {
        self.panic.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    async fn write_frame(&self, frame: AudioChunk, _duration: Duration) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("failed".to_string()));
        }
        if self.panic.load(Ordering::SeqCst) {
            panic!("sink bug");
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(frame.data.len(), Ordering::SeqCst);
        Ok(())
    }
}

/// Every event of `category` delivered to the manager.
pub fn capture(events: &EventManager, category: EventCategory) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.subscribe(
        category,
        handler(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().push(event);
                Ok(())
            }
        }),
    );
    seen
}
