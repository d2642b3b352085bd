//! Per-peer event fan-out.
//!
//! Observers subscribe to one [`EventCategory`] and receive every event of
//! that category emitted for the peer. Each subscription owns an unbounded
//! queue drained by its own worker task, so `emit` never waits on a handler
//! and a failing or panicking handler only loses its own event.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::core::realtime::{RealtimeProvider, TranscriptRole};

/// How long `shutdown` waits for handlers to drain their queues.
pub const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Closed set of event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Audio,
    Session,
    DataChannel,
    User,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Audio => write!(f, "audio"),
            EventCategory::Session => write!(f, "session"),
            EventCategory::DataChannel => write!(f, "data_channel"),
            EventCategory::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioEvent {
    VoiceActivityDetected,
    SilenceDetected,
    ModelSpeechStarted,
    ModelSpeechEnded,
    Interrupted { dropped_frames: usize },
    /// A user segment was discarded while the model was speaking.
    SegmentDropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionLifecycle {
    Starting,
    Connected { provider: RealtimeProvider },
    TurnCompleted,
    TurnAborted { reason: String },
    Ended { reason: String },
    Error { message: String },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataChannelEvent {
    Transcript { role: TranscriptRole, text: String },
    Opened,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    Audio(AudioEvent),
    Session(SessionLifecycle),
    DataChannel(DataChannelEvent),
    User(UserEvent),
}

impl EventPayload {
    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::Audio(_) => EventCategory::Audio,
            EventPayload::Session(_) => EventCategory::Session,
            EventPayload::DataChannel(_) => EventCategory::DataChannel,
            EventPayload::User(_) => EventCategory::User,
        }
    }
}

impl From<AudioEvent> for EventPayload {
    fn from(event: AudioEvent) -> Self {
        EventPayload::Audio(event)
    }
}

impl From<SessionLifecycle> for EventPayload {
    fn from(event: SessionLifecycle) -> Self {
        EventPayload::Session(event)
    }
}

impl From<DataChannelEvent> for EventPayload {
    fn from(event: DataChannelEvent) -> Self {
        EventPayload::DataChannel(event)
    }
}

impl From<UserEvent> for EventPayload {
    fn from(event: UserEvent) -> Self {
        EventPayload::User(event)
    }
}

/// Immutable event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub peer_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }
}

/// Async event handler. Errors are logged and otherwise ignored.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    category: EventCategory,
    tx: mpsc::UnboundedSender<Event>,
    worker: JoinHandle<()>,
}

/// Subscription table for one peer.
pub struct EventManager {
    peer_id: String,
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl EventManager {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Register `handler` for `category`. Must be called inside a Tokio
    /// runtime.
    pub fn subscribe(&self, category: EventCategory, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.closed.load(Ordering::SeqCst) {
            debug!(peer_id = %self.peer_id, %category, "subscribe after shutdown ignored");
            return id;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_handler(self.peer_id.clone(), category, handler, rx));

        self.subscriptions.lock().push(Subscription {
            id,
            category,
            tx,
            worker,
        });
        id
    }

    /// Remove a subscription. Events already queued for it are still
    /// delivered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Queue `payload` for every subscriber of its category, in registration
    /// order. Never blocks.
    pub fn emit(&self, payload: impl Into<EventPayload>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let event = Event {
            peer_id: self.peer_id.clone(),
            payload: payload.into(),
        };
        let category = event.category();

        for subscription in self.subscriptions.lock().iter() {
            if subscription.category == category && subscription.tx.send(event.clone()).is_err() {
                debug!(peer_id = %self.peer_id, %category, "subscriber worker gone");
            }
        }
    }

    pub fn emit_user(&self, name: impl Into<String>, data: serde_json::Value) {
        self.emit(UserEvent {
            name: name.into(),
            data,
        });
    }

    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.category == category)
            .count()
    }

    /// Stop accepting events and let handlers drain their queues for up to
    /// [`EVENT_DRAIN_TIMEOUT`].
    pub async fn shutdown(&self) {
        self.shutdown_within(EVENT_DRAIN_TIMEOUT).await;
    }

    /// Stop accepting events and wait up to `limit` for queued events to be
    /// handled. Workers still running after `limit` are aborted.
    pub async fn shutdown_within(&self, limit: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        let mut workers: Vec<JoinHandle<()>> = subscriptions
            .into_iter()
            .map(|subscription| subscription.worker)
            .collect();

        match timeout(limit, join_all(workers.iter_mut())).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(Result::err) {
                    debug!(peer_id = %self.peer_id, "event worker ended abnormally: {}", e);
                }
            }
            Err(_) => {
                warn!(
                    peer_id = %self.peer_id,
                    ?limit,
                    "event handlers did not drain in time, aborting"
                );
                for worker in &workers {
                    worker.abort();
                }
            }
        }
        debug!(peer_id = %self.peer_id, "event manager shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn run_handler(
    peer_id: String,
    category: EventCategory,
    handler: EventHandler,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = rx.recv().await {
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
        let outcome = match call {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(peer_id = %peer_id, %category, "event handler failed: {:#}", e),
            Err(_) => error!(peer_id = %peer_id, %category, "event handler panicked"),
        }
    }
}
