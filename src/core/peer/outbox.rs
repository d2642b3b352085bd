//! Ordered, queue-until-open sender for the peer's data channel.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;

use crate::errors::TransportError;

/// Text-capable channel the outbox writes to.
#[async_trait]
pub trait DataChannelTransport: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
}

#[async_trait]
impl DataChannelTransport for RTCDataChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        RTCDataChannel::send_text(self, text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::DataChannel(e.to_string()))
    }
}

#[derive(Default)]
struct OutboxState {
    channel: Option<Arc<dyn DataChannelTransport>>,
    open: bool,
    closed: bool,
    pending: VecDeque<String>,
}

/// Messages sent before the channel opens are held and flushed in order on
/// open. Messages sent after close are dropped.
#[derive(Default)]
pub struct DataChannelOutbox {
    state: Mutex<OutboxState>,
}

impl DataChannelOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the channel the browser opened.
    pub async fn attach(&self, channel: Arc<dyn DataChannelTransport>) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.channel = Some(channel);
    }

    /// Mark the channel open and flush everything queued so far.
    pub async fn mark_open(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        let Some(channel) = state.channel.clone() else {
            return Err(TransportError::DataChannel(
                "opened before a channel was attached".to_string(),
            ));
        };
        state.open = true;

        debug!(pending = state.pending.len(), "data channel open, flushing");
        while let Some(message) = state.pending.pop_front() {
            if let Err(e) = channel.send_text(message.clone()).await {
                state.pending.push_front(message);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Send `message`, or queue it until the channel opens.
    pub async fn send(&self, message: String) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            warn!("dropping data channel message after close");
            return Err(TransportError::PeerClosed);
        }
        match (&state.channel, state.open) {
            (Some(channel), true) => {
                let channel = channel.clone();
                channel.send_text(message).await
            }
            _ => {
                state.pending.push_back(message);
                Ok(())
            }
        }
    }

    /// The channel closed; further sends are dropped.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.open = false;
        state.channel = None;
        state.pending.clear();
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
