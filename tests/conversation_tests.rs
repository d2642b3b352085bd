//! Conversation loop tests against a scripted speech session.
//!
//! Time is paused, so silence timeouts, debounce windows and playback
//! pacing run on the virtual clock.

mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use mock_providers::{MockConnector, RecordingSink, capture, feed, silence, tone, wait_until};
use rehearsal_gateway::core::AudioChunk;
use rehearsal_gateway::core::conversation::{
    ConversationConfig, ConversationDeps, ConversationHandle, EndReason, LoopState,
};
use rehearsal_gateway::core::events::{
    AudioEvent, DataChannelEvent, Event, EventCategory, EventManager, EventPayload,
    SessionLifecycle,
};
use rehearsal_gateway::core::realtime::{RealtimeProvider, TranscriptRole};

const PEER_RATE: u32 = 48000;

struct Harness {
    connector: Arc<MockConnector>,
    sink: Arc<RecordingSink>,
    events: Arc<EventManager>,
    inbound: mpsc::Sender<AudioChunk>,
    handle: ConversationHandle,
}

fn start(config: ConversationConfig, instructions: Option<&str>) -> Harness {
    start_with(MockConnector::new(), config, instructions)
}

fn start_with(
    connector: Arc<MockConnector>,
    config: ConversationConfig,
    instructions: Option<&str>,
) -> Harness {
    let sink = RecordingSink::new(PEER_RATE);
    let events = Arc::new(EventManager::new("peer-1"));
    let (inbound, rx) = mpsc::channel(50);
    let handle = ConversationHandle::start(
        "peer-1",
        config,
        ConversationDeps {
            connector: connector.clone(),
            sink: sink.clone(),
            events: events.clone(),
            inbound: rx,
            instructions: instructions.map(str::to_string),
        },
    );
    Harness {
        connector,
        sink,
        events,
        inbound,
        handle,
    }
}

fn has(events: &Mutex<Vec<Event>>, expected: &EventPayload) -> bool {
    events.lock().iter().any(|e| &e.payload == expected)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_round_trip() {
    let h = start(ConversationConfig::default(), Some("Play a tough buyer."));
    let session_events = capture(&h.events, EventCategory::Session);
    let data_events = capture(&h.events, EventCategory::DataChannel);

    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();
    assert_eq!(
        h.connector.last_instructions().as_deref(),
        Some("Play a tough buyer.")
    );
    assert!(wait_until(secs(1), || h.handle.state() == LoopState::Listening).await);

    // 200 ms of speech, then nothing: the silence timeout closes the turn
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(3), || session.turn_ends().len() == 1).await);
    assert!(session.audio_inputs() >= 8);
    assert_eq!(session.turn_ends(), vec![String::new()]);

    // Model answers with 400 ms of audio and a sentence
    session.say_audio(400);
    session.say_text(TranscriptRole::Assistant, "Hello there. I need a");
    session.pump().turn_complete();

    assert!(wait_until(secs(2), || h.sink.frames() >= 20).await);
    assert!(
        wait_until(secs(1), || {
            has(
                &data_events,
                &EventPayload::DataChannel(DataChannelEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    text: "Hello there.".to_string(),
                }),
            )
        })
        .await
    );

    let outcome = h.handle.stop().await.expect("loop outcome");
    assert_eq!(outcome.reason, EndReason::Stopped);
    assert_eq!(outcome.provider, Some(RealtimeProvider::OpenAI));
    let texts: Vec<&str> = outcome.transcript.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["Hello there.", "I need a"]);
    assert!(session.is_closed());
    assert_eq!(h.handle.state(), LoopState::Closed);

    assert!(
        wait_until(secs(1), || has(
            &session_events,
            &EventPayload::Session(SessionLifecycle::Closed)
        ))
        .await
    );
    assert!(has(
        &session_events,
        &EventPayload::Session(SessionLifecycle::Connected {
            provider: RealtimeProvider::OpenAI
        })
    ));
    assert!(has(
        &session_events,
        &EventPayload::Session(SessionLifecycle::TurnCompleted)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_turn_complete_is_debounced() {
    let config = ConversationConfig {
        turn_complete_text: "Your turn.".to_string(),
        ..Default::default()
    };
    let h = start(config, None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(3), || session.turn_ends().len() == 1).await);
    let forwarded = session.audio_inputs();

    // A second utterance inside the debounce window is forwarded but does
    // not close another turn
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(session.audio_inputs() > forwarded);
    assert_eq!(session.turn_ends().len(), 1);

    // Past the window the next silence completes the turn again
    tokio::time::sleep(secs(5)).await;
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(3), || session.turn_ends().len() == 2).await);
    assert_eq!(session.turn_ends(), vec!["Your turn.", "Your turn."]);

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_frames_end_the_turn() {
    let h = start(ConversationConfig::default(), None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    feed(&h.inbound, tone, 200, PEER_RATE).await;
    feed(&h.inbound, silence, 1100, PEER_RATE).await;
    assert!(wait_until(Duration::from_millis(500), || session.turn_ends().len() == 1).await);

    // Silence alone never opens a turn
    feed(&h.inbound, silence, 2000, PEER_RATE).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.turn_ends().len(), 1);

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_three_voiced_frames_then_silence_close_one_turn() {
    let h = start(ConversationConfig::default(), None);
    let audio_events = capture(&h.events, EventCategory::Audio);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    feed(&h.inbound, tone, 60, PEER_RATE).await;
    feed(&h.inbound, silence, 1200, PEER_RATE).await;
    tokio::time::sleep(secs(1)).await;
    assert_eq!(session.turn_ends().len(), 1);

    let order: Vec<AudioEvent> = audio_events
        .lock()
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Audio(
                a @ (AudioEvent::VoiceActivityDetected | AudioEvent::SilenceDetected),
            ) => Some(a.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![AudioEvent::VoiceActivityDetected, AudioEvent::SilenceDetected]
    );

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interruption_discards_queued_playback() {
    let h = start(ConversationConfig::default(), None);
    let audio_events = capture(&h.events, EventCategory::Audio);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    // Two seconds is 100 frames at 20 ms
    session.say_audio(2000);
    assert!(wait_until(secs(1), || h.sink.frames() >= 3).await);

    session.pump().interrupted();
    assert!(
        wait_until(secs(1), || {
            audio_events.lock().iter().any(|e| {
                matches!(
                    &e.payload,
                    EventPayload::Audio(AudioEvent::Interrupted { dropped_frames }) if *dropped_frames > 0
                )
            })
        })
        .await
    );

    assert_eq!(h.handle.queued_frames(), 0);
    let played = h.sink.frames();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.sink.frames(), played);
    assert_eq!(h.handle.queued_frames(), 0);
    assert!(played < 100);
    assert_eq!(h.handle.state(), LoopState::Listening);

    // The model is no longer speaking, so user audio flows again
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(1), || session.audio_inputs() > 0).await);

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_user_audio_dropped_while_model_speaks() {
    let h = start(ConversationConfig::default(), None);
    let audio_events = capture(&h.events, EventCategory::Audio);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    session.say_audio(1000);
    assert!(wait_until(secs(1), || h.sink.frames() >= 1).await);

    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(
        wait_until(secs(1), || has(
            &audio_events,
            &EventPayload::Audio(AudioEvent::SegmentDropped)
        ))
        .await
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(session.audio_inputs(), 0);
    assert!(session.turn_ends().is_empty());

    // The speaking flag expires two seconds after the last model audio
    tokio::time::sleep(secs(1)).await;
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(1), || session.audio_inputs() > 0).await);
    assert!(has(
        &audio_events,
        &EventPayload::Audio(AudioEvent::ModelSpeechEnded)
    ));

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_aborts_only_that_turn() {
    let config = ConversationConfig {
        turn_debounce_ms: 0,
        ..Default::default()
    };
    let h = start(config, None);
    let session_events = capture(&h.events, EventCategory::Session);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    session.fail_sends(true);
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(
        wait_until(secs(1), || session_events.lock().iter().any(|e| matches!(
            &e.payload,
            EventPayload::Session(SessionLifecycle::TurnAborted { .. })
        )))
        .await
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(session.turn_ends().is_empty());
    assert!(!h.handle.is_finished());

    session.fail_sends(false);
    feed(&h.inbound, tone, 200, PEER_RATE).await;
    assert!(wait_until(secs(3), || session.turn_ends().len() == 1).await);

    h.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_ends_loop() {
    let h = start_with(MockConnector::failing(), ConversationConfig::default(), None);
    let session_events = capture(&h.events, EventCategory::Session);

    let outcome = h.handle.join().await.expect("loop outcome");
    assert!(matches!(outcome.reason, EndReason::ConnectFailed(_)));
    assert_eq!(outcome.provider, None);
    assert!(outcome.transcript.is_empty());

    assert!(
        wait_until(secs(1), || session_events.lock().iter().any(|e| matches!(
            &e.payload,
            EventPayload::Session(SessionLifecycle::Error { .. })
        )))
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_upstream_close_flushes_transcript() {
    let h = start(ConversationConfig::default(), None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    session.say_text(TranscriptRole::User, "Is that your best");
    session.pump().finish();

    let outcome = h.handle.join().await.expect("loop outcome");
    assert_eq!(outcome.reason, EndReason::UpstreamClosed);
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(outcome.transcript[0].role, TranscriptRole::User);
    assert_eq!(outcome.transcript[0].text, "Is that your best");
    assert!(outcome.ended_at >= outcome.started_at);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_close_ends_loop() {
    let h = start(ConversationConfig::default(), None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);

    drop(h.inbound);
    let outcome = h.handle.join().await.expect("loop outcome");
    assert_eq!(outcome.reason, EndReason::InboundClosed);
    assert!(h.connector.session(0).unwrap().is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_ends_loop() {
    let h = start(ConversationConfig::default(), None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    h.sink.fail_writes();
    session.say_audio(100);

    let outcome = h.handle.join().await.expect("loop outcome");
    assert!(matches!(outcome.reason, EndReason::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_reports_session_error() {
    let h = start(ConversationConfig::default(), None);
    let session_events = capture(&h.events, EventCategory::Session);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);
    let session = h.connector.session(0).unwrap();

    h.sink.panic_writes();
    session.say_audio(100);

    let outcome = h.handle.join().await.expect("loop outcome");
    match &outcome.reason {
        EndReason::Failed(message) => assert!(message.contains("panicked")),
        other => panic!("unexpected end reason: {other:?}"),
    }
    assert!(wait_until(secs(1), || {
        session_events.lock().iter().any(|e| {
            matches!(&e.payload, EventPayload::Session(SessionLifecycle::Error { message }) if message.contains("panicked"))
        })
    })
    .await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let h = start(ConversationConfig::default(), None);
    assert!(wait_until(secs(1), || h.connector.connects() == 1).await);

    let first = h.handle.stop().await.expect("loop outcome");
    let second = h.handle.stop().await.expect("loop outcome");
    assert_eq!(first.reason, EndReason::Stopped);
    assert_eq!(second.reason, EndReason::Stopped);
    assert!(h.handle.is_finished());
}
