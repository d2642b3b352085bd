//! Event plumbing shared by every provider.
//!
//! Provider clients translate wire messages and hand the results to an
//! [`EventPump`]. The pump owns the receive channel and the per-direction
//! transcript accumulators, so sentence assembly and flush-on-close behave the
//! same for every provider.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::base::{
    RealtimeAudioData, RealtimeError, RealtimeResult, SessionEvent, SessionEventStream,
    TranscriptRole, TranscriptSegment,
};
use crate::core::transcript::SharedTranscriptAccumulator;

type EventSender = mpsc::UnboundedSender<RealtimeResult<SessionEvent>>;
type EventReceiver = mpsc::UnboundedReceiver<RealtimeResult<SessionEvent>>;

pub struct EventPump {
    tx: Mutex<Option<EventSender>>,
    rx: Mutex<Option<EventReceiver>>,
    user: SharedTranscriptAccumulator,
    assistant: SharedTranscriptAccumulator,
}

impl Default for EventPump {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPump {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            user: SharedTranscriptAccumulator::new(),
            assistant: SharedTranscriptAccumulator::new(),
        }
    }

    /// Hand out the receive stream. Fails after the first call.
    pub fn take_stream(&self) -> RealtimeResult<SessionEventStream> {
        let mut rx = self.rx.lock().take().ok_or(RealtimeError::StreamConsumed)?;
        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }

    pub fn audio(&self, audio: RealtimeAudioData) {
        self.push(Ok(SessionEvent::Audio(audio)));
    }

    /// Feed a transcript delta. `complete` marks a fragment that closes an
    /// utterance, so any remainder is flushed with it.
    pub fn transcript(&self, role: TranscriptRole, fragment: &str, complete: bool) {
        let accumulator = self.accumulator(role);
        if let Some(text) = accumulator.feed(fragment) {
            self.push_transcript(role, text);
        }
        if complete {
            if let Some(text) = accumulator.flush() {
                self.push_transcript(role, text);
            }
        }
    }

    pub fn turn_complete(&self) {
        self.flush();
        self.push(Ok(SessionEvent::TurnComplete));
    }

    pub fn interrupted(&self) {
        self.flush_role(TranscriptRole::Assistant);
        self.push(Ok(SessionEvent::Interrupted));
    }

    pub fn error(&self, error: RealtimeError) {
        self.push(Err(error));
    }

    /// Emit whatever both accumulators are holding.
    pub fn flush(&self) {
        self.flush_role(TranscriptRole::User);
        self.flush_role(TranscriptRole::Assistant);
    }

    /// Flush transcripts and end the stream. Idempotent.
    pub fn finish(&self) {
        self.flush();
        if self.tx.lock().take().is_some() {
            debug!("session event stream finished");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn flush_role(&self, role: TranscriptRole) {
        if let Some(text) = self.accumulator(role).flush() {
            self.push_transcript(role, text);
        }
    }

    fn accumulator(&self, role: TranscriptRole) -> &SharedTranscriptAccumulator {
        match role {
            TranscriptRole::User => &self.user,
            TranscriptRole::Assistant => &self.assistant,
        }
    }

    fn push_transcript(&self, role: TranscriptRole, text: String) {
        self.push(Ok(SessionEvent::Transcript(TranscriptSegment { role, text })));
    }

    fn push(&self, event: RealtimeResult<SessionEvent>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            // receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}
