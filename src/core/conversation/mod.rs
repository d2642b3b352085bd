//! Audio processing loop.
//!
//! One loop runs per peer while a conversation is live. It connects a
//! speech-model session, segments inbound PCM into voice frames, decides when
//! the user's turn is over, and paces model audio back out to an
//! [`AudioSink`]. Four tasks share one cancellation token:
//!
//! - **listen**: inbound PCM -> segmenter -> bounded model queue
//! - **send**: model queue -> `SpeechSession::send`
//! - **receive**: session events -> playback queue, transcripts, events
//! - **play**: playback queue -> sink, one frame per frame interval
//!
//! The first task to finish ends the loop.

mod config;
mod playback;
mod processor;
mod turn;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use config::ConversationConfig;
pub use playback::{AudioSink, FrameSplitter, PlaybackQueue};
pub use turn::TurnPolicy;

use crate::core::audio::AudioChunk;
use crate::core::events::EventManager;
use crate::core::realtime::{RealtimeProvider, SessionConnector, TranscriptRole};

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Connected,
    Listening,
    Speaking,
    Ending,
    Closed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Starting => "starting",
            LoopState::Connected => "connected",
            LoopState::Listening => "listening",
            LoopState::Speaking => "speaking",
            LoopState::Ending => "ending",
            LoopState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Stopped through the handle
    Stopped,
    /// The inbound audio channel closed
    InboundClosed,
    /// The session's event stream ended
    UpstreamClosed,
    /// The session could not be opened
    ConnectFailed(String),
    /// A task failed
    Failed(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::InboundClosed => write!(f, "inbound closed"),
            EndReason::UpstreamClosed => write!(f, "upstream closed"),
            EndReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            EndReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// One sentence of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub role: TranscriptRole,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// What a finished loop hands back.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub reason: EndReason,
    pub provider: Option<RealtimeProvider>,
    pub transcript: Vec<TranscriptLine>,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
}

/// Collaborators a loop is built from.
pub struct ConversationDeps {
    pub connector: Arc<dyn SessionConnector>,
    pub sink: Arc<dyn AudioSink>,
    pub events: Arc<EventManager>,
    /// PCM from the peer's inbound track
    pub inbound: mpsc::Receiver<AudioChunk>,
    /// Persona instructions for the session
    pub instructions: Option<String>,
}

/// Handle to a running loop. `stop` and `join` may both be awaited, from
/// any number of clones of an `Arc` around it.
pub struct ConversationHandle {
    state: watch::Receiver<LoopState>,
    cancel: CancellationToken,
    done: Shared<BoxFuture<'static, Option<LoopOutcome>>>,
    abort: AbortHandle,
    close_timeout: Duration,
    playback: Arc<PlaybackQueue>,
}

impl ConversationHandle {
    /// Spawn a loop for `peer_id`.
    pub fn start(peer_id: impl Into<String>, config: ConversationConfig, deps: ConversationDeps) -> Self {
        let peer_id = peer_id.into();
        let (state_tx, state_rx) = watch::channel(LoopState::Starting);
        let cancel = CancellationToken::new();
        let close_timeout = config.close_timeout();
        let playback = Arc::new(PlaybackQueue::new());

        let task = tokio::spawn(processor::run(
            peer_id.clone(),
            config,
            deps,
            playback.clone(),
            state_tx,
            cancel.clone(),
        ));
        let abort = task.abort_handle();
        let done = task
            .map(move |result| match result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(peer_id = %peer_id, "conversation loop ended abnormally: {}", e);
                    None
                }
            })
            .boxed()
            .shared();

        Self {
            state: state_rx,
            cancel,
            done,
            abort,
            close_timeout,
            playback,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Model audio frames waiting to be played.
    pub fn queued_frames(&self) -> usize {
        self.playback.len()
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Cancel the loop and wait for it, aborting if teardown overruns.
    pub async fn stop(&self) -> Option<LoopOutcome> {
        self.cancel.cancel();

        // Teardown waits on the tasks and on the session close, each bounded.
        match tokio::time::timeout(self.close_timeout * 3, self.done.clone()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("conversation loop did not stop in time, aborting");
                self.abort.abort();
                None
            }
        }
    }

    /// Wait for the loop to end.
    pub async fn join(&self) -> Option<LoopOutcome> {
        self.done.clone().await
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
