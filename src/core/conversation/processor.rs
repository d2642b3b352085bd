use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::playback::{AudioSink, FrameSplitter, PlaybackQueue};
use super::turn::TurnPolicy;
use super::{ConversationConfig, ConversationDeps, EndReason, LoopOutcome, LoopState, TranscriptLine};
use crate::core::audio::{AudioChunk, Segmenter, SegmenterOutput, VoiceSegment, resample_bytes};
use crate::core::events::{AudioEvent, DataChannelEvent, EventManager, SessionLifecycle};
use crate::core::realtime::{
    RealtimeError, SessionEvent, SessionEventStream, SessionInput, SharedSpeechSession,
};

/// Work for the send task, in the order the user produced it.
#[derive(Debug)]
enum ModelInput {
    Audio(VoiceSegment),
    EndOfTurn { utterance: u64 },
}

/// How a loop task finished.
#[derive(Debug)]
enum TaskExit {
    Cancelled,
    InboundClosed,
    UpstreamClosed,
    Failed(String),
}

impl From<TaskExit> for EndReason {
    fn from(exit: TaskExit) -> Self {
        match exit {
            TaskExit::Cancelled => EndReason::Stopped,
            TaskExit::InboundClosed => EndReason::InboundClosed,
            TaskExit::UpstreamClosed => EndReason::UpstreamClosed,
            TaskExit::Failed(e) => EndReason::Failed(e),
        }
    }
}

/// State shared by the four tasks.
struct Shared {
    peer_id: String,
    config: ConversationConfig,
    events: Arc<EventManager>,
    policy: Mutex<TurnPolicy>,
    playback: Arc<PlaybackQueue>,
    transcript: Mutex<Vec<TranscriptLine>>,
    state: watch::Sender<LoopState>,
}

impl Shared {
    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(peer_id = %self.peer_id, from = %previous, to = %state, "loop state");
        }
    }

    /// Clear the model speaking flag if the speaking timeout has elapsed.
    fn model_speaking(&self, now: Instant) -> bool {
        let mut policy = self.policy.lock();
        if policy.expire_speaking(now) {
            self.events.emit(AudioEvent::ModelSpeechEnded);
            self.set_state(LoopState::Listening);
        }
        policy.is_model_speaking()
    }
}

pub(super) async fn run(
    peer_id: String,
    config: ConversationConfig,
    deps: ConversationDeps,
    playback: Arc<PlaybackQueue>,
    state: watch::Sender<LoopState>,
    cancel: CancellationToken,
) -> LoopOutcome {
    let started_at = OffsetDateTime::now_utc();
    let ConversationDeps {
        connector,
        sink,
        events,
        inbound,
        instructions,
    } = deps;

    let shared = Arc::new(Shared {
        peer_id: peer_id.clone(),
        policy: Mutex::new(TurnPolicy::new(config.speaking_timeout(), config.turn_debounce())),
        playback,
        transcript: Mutex::new(Vec::new()),
        events: events.clone(),
        state,
        config,
    });

    shared.set_state(LoopState::Starting);
    events.emit(SessionLifecycle::Starting);
    info!(peer_id = %peer_id, "conversation starting");

    let connected = tokio::select! {
        _ = cancel.cancelled() => Err(EndReason::Stopped),
        result = connector.connect(instructions) => {
            result.and_then(|session| session.receive().map(|stream| (session, stream)))
                .map_err(|e| EndReason::ConnectFailed(e.to_string()))
        }
    };

    let (session, stream) = match connected {
        Ok(connected) => connected,
        Err(reason) => {
            if let EndReason::ConnectFailed(message) = &reason {
                error!(peer_id = %peer_id, "speech session connect failed: {}", message);
                events.emit(SessionLifecycle::Error {
                    message: message.clone(),
                });
            }
            return finish(&shared, reason, None, started_at);
        }
    };

    let provider = session.provider();
    shared.set_state(LoopState::Connected);
    events.emit(SessionLifecycle::Connected { provider });
    info!(peer_id = %peer_id, %provider, "speech session connected");
    shared.set_state(LoopState::Listening);

    let group = cancel.child_token();
    let (model_tx, model_rx) = mpsc::channel(shared.config.inbound_queue_capacity);
    let segmenter = Segmenter::new(shared.config.segmenter(session.input_sample_rate()));

    let mut tasks = JoinSet::new();
    tasks.spawn(listen(shared.clone(), inbound, segmenter, model_tx, group.clone()));
    tasks.spawn(send(shared.clone(), session.clone(), model_rx, group.clone()));
    tasks.spawn(receive(shared.clone(), stream, sink.sample_rate()));
    tasks.spawn(play(shared.clone(), sink, group.clone()));

    let reason: EndReason = match tasks.join_next().await {
        Some(Ok(exit)) => exit.into(),
        Some(Err(e)) => {
            let message = format!("task panicked: {e}");
            events.emit(SessionLifecycle::Error {
                message: message.clone(),
            });
            EndReason::Failed(message)
        }
        None => EndReason::Stopped,
    };
    if let EndReason::Failed(message) = &reason {
        error!(peer_id = %peer_id, "conversation task failed: {}", message);
    }

    shared.set_state(LoopState::Ending);
    info!(peer_id = %peer_id, %reason, "conversation ending");

    group.cancel();
    let dropped = shared.playback.clear();
    shared.playback.close();
    if dropped > 0 {
        debug!(peer_id = %peer_id, dropped, "discarded queued playback on teardown");
    }

    let close_timeout = shared.config.close_timeout();
    match timeout(close_timeout, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(peer_id = %peer_id, "speech session close failed: {}", e),
        Err(_) => warn!(peer_id = %peer_id, "speech session close timed out"),
    }

    // The receive task drains transcript text flushed by close.
    let drained = timeout(close_timeout, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                debug!("conversation task ended abnormally: {}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(peer_id = %peer_id, "conversation tasks did not finish, aborting");
        tasks.abort_all();
    }

    finish(&shared, reason, Some(provider), started_at)
}

fn finish(
    shared: &Shared,
    reason: EndReason,
    provider: Option<crate::core::realtime::RealtimeProvider>,
    started_at: OffsetDateTime,
) -> LoopOutcome {
    shared.events.emit(SessionLifecycle::Ended {
        reason: reason.to_string(),
    });
    shared.events.emit(SessionLifecycle::Closed);
    shared.set_state(LoopState::Closed);
    info!(peer_id = %shared.peer_id, %reason, "conversation closed");

    LoopOutcome {
        reason,
        provider,
        transcript: std::mem::take(&mut *shared.transcript.lock()),
        started_at,
        ended_at: OffsetDateTime::now_utc(),
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<AudioChunk>,
    mut segmenter: Segmenter,
    model_tx: mpsc::Sender<ModelInput>,
    cancel: CancellationToken,
) -> TaskExit {
    let silence_timeout = shared.config.silence_timeout();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            next = timeout(silence_timeout, inbound.recv()) => next,
        };

        let outputs = match next {
            Ok(Some(chunk)) => segmenter.process(&chunk.data, chunk.sample_rate).outputs,
            Ok(None) => return TaskExit::InboundClosed,
            // No frames at all for a silence timeout while someone was talking
            Err(_) => segmenter.force_silence().into_iter().collect(),
        };

        for output in outputs {
            let forwarded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TaskExit::Cancelled,
                forwarded = handle_segmenter_output(&shared, &model_tx, output) => forwarded,
            };
            if !forwarded {
                return TaskExit::Cancelled;
            }
        }
    }
}

/// Returns false once the send task is gone.
async fn handle_segmenter_output(
    shared: &Shared,
    model_tx: &mpsc::Sender<ModelInput>,
    output: SegmenterOutput,
) -> bool {
    match output {
        SegmenterOutput::VoiceStarted { utterance } => {
            debug!(peer_id = %shared.peer_id, utterance, "voice activity");
            shared.events.emit(AudioEvent::VoiceActivityDetected);
            true
        }
        SegmenterOutput::Segment(segment) => {
            if shared.model_speaking(Instant::now()) {
                shared.events.emit(AudioEvent::SegmentDropped);
                return true;
            }
            if model_tx.send(ModelInput::Audio(segment)).await.is_err() {
                return false;
            }
            shared.policy.lock().on_user_audio();
            true
        }
        SegmenterOutput::SilenceTimeout { utterance, voiced_ms } => {
            debug!(peer_id = %shared.peer_id, utterance, voiced_ms, "silence");
            shared.events.emit(AudioEvent::SilenceDetected);
            let complete = shared.policy.lock().on_silence_timeout(Instant::now());
            if !complete {
                return true;
            }
            model_tx
                .send(ModelInput::EndOfTurn { utterance })
                .await
                .is_ok()
        }
    }
}

async fn send(
    shared: Arc<Shared>,
    session: SharedSpeechSession,
    mut model_rx: mpsc::Receiver<ModelInput>,
    cancel: CancellationToken,
) -> TaskExit {
    let mut aborted_utterance: Option<u64> = None;

    loop {
        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            input = model_rx.recv() => input,
        };

        let (input, utterance, end_of_turn) = match input {
            None => return TaskExit::Cancelled,
            Some(ModelInput::Audio(segment)) => {
                let utterance = segment.utterance;
                if aborted_utterance == Some(utterance) {
                    continue;
                }
                let chunk = AudioChunk::new(segment.data, segment.sample_rate);
                (SessionInput::Audio(chunk), utterance, false)
            }
            Some(ModelInput::EndOfTurn { utterance }) => {
                if aborted_utterance.take() == Some(utterance) {
                    debug!(peer_id = %shared.peer_id, utterance, "skipping end of aborted turn");
                    continue;
                }
                let text = shared.config.turn_complete_text.clone();
                (SessionInput::Text(text), utterance, true)
            }
        };

        match session.send(input).await {
            Ok(()) => {
                if end_of_turn {
                    info!(peer_id = %shared.peer_id, utterance, "user turn complete");
                    shared.events.emit(SessionLifecycle::TurnCompleted);
                }
            }
            Err(e) if e.is_session_fatal() => {
                shared.events.emit(SessionLifecycle::Error {
                    message: e.to_string(),
                });
                return TaskExit::Failed(e.to_string());
            }
            Err(e) => {
                warn!(peer_id = %shared.peer_id, utterance, "turn aborted: {}", e);
                shared.policy.lock().abort_turn();
                if !end_of_turn {
                    aborted_utterance = Some(utterance);
                }
                shared.events.emit(SessionLifecycle::TurnAborted {
                    reason: e.to_string(),
                });
            }
        }
    }
}

async fn receive(shared: Arc<Shared>, mut stream: SessionEventStream, sink_rate: u32) -> TaskExit {
    let mut splitter = FrameSplitter::new(sink_rate, shared.config.frame_ms);

    while let Some(event) = stream.next().await {
        match event {
            Ok(SessionEvent::Audio(audio)) => {
                let started = shared.policy.lock().on_model_audio(Instant::now());
                if started {
                    shared.events.emit(AudioEvent::ModelSpeechStarted);
                    shared.set_state(LoopState::Speaking);
                }
                let pcm = resample_bytes(&audio.data, audio.sample_rate, sink_rate);
                for frame in splitter.push(&pcm) {
                    shared.playback.push(frame);
                }
            }
            Ok(SessionEvent::Transcript(segment)) => {
                debug!(peer_id = %shared.peer_id, role = %segment.role, "transcript: {}", segment.text);
                shared.transcript.lock().push(TranscriptLine {
                    role: segment.role,
                    text: segment.text.clone(),
                    at: OffsetDateTime::now_utc(),
                });
                shared.events.emit(DataChannelEvent::Transcript {
                    role: segment.role,
                    text: segment.text,
                });
            }
            Ok(SessionEvent::TurnComplete) => {
                if let Some(frame) = splitter.flush() {
                    shared.playback.push(frame);
                }
                if shared.policy.lock().on_model_turn_end() {
                    shared.events.emit(AudioEvent::ModelSpeechEnded);
                }
                shared.set_state(LoopState::Listening);
            }
            Ok(SessionEvent::Interrupted) => {
                splitter.clear();
                let dropped_frames = shared.playback.clear();
                shared.policy.lock().on_model_turn_end();
                info!(peer_id = %shared.peer_id, dropped_frames, "model interrupted");
                shared.events.emit(AudioEvent::Interrupted { dropped_frames });
                shared.set_state(LoopState::Listening);
            }
            Err(RealtimeError::ProviderError(message)) => {
                warn!(peer_id = %shared.peer_id, "provider reported error: {}", message);
                shared.events.emit(SessionLifecycle::TurnAborted { reason: message });
            }
            Err(e) => {
                error!(peer_id = %shared.peer_id, "speech session receive failed: {}", e);
                shared.events.emit(SessionLifecycle::Error {
                    message: e.to_string(),
                });
                return TaskExit::Failed(e.to_string());
            }
        }
    }

    TaskExit::UpstreamClosed
}

async fn play(shared: Arc<Shared>, sink: Arc<dyn AudioSink>, cancel: CancellationToken) -> TaskExit {
    let frame_duration: Duration = shared.config.frame_duration();
    let sample_rate = sink.sample_rate();
    let mut ticker = interval(frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            next = shared.playback.pop() => next,
        };
        let Some((epoch, frame)) = next else {
            return TaskExit::Cancelled;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskExit::Cancelled,
            _ = ticker.tick() => {}
        }

        // Interrupted while waiting for the tick
        if shared.playback.epoch() != epoch {
            continue;
        }

        if let Err(e) = sink
            .write_frame(AudioChunk::new(frame, sample_rate), frame_duration)
            .await
        {
            error!(peer_id = %shared.peer_id, "audio sink write failed: {}", e);
            shared.events.emit(SessionLifecycle::Error {
                message: e.to_string(),
            });
            return TaskExit::Failed(e.to_string());
        }
    }
}
