use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::audio::SegmenterConfig;

/// Timing and sizing knobs for one conversation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// User segments are dropped for this long after the last model audio (ms)
    pub speaking_timeout_ms: u64,

    /// Minimum gap between two turn-complete signals (ms)
    pub turn_debounce_ms: u64,

    /// Silence that ends a user utterance (ms)
    pub silence_timeout_ms: u32,

    /// Voiced audio needed before an utterance starts (ms)
    pub min_voiced_ms: u32,

    /// Segment and playback frame unit (ms)
    pub frame_ms: u32,

    /// RMS level (0.0 - 1.0) that counts as voice
    pub energy_threshold: f32,

    /// Capacity of the queue between segmentation and the upstream sender
    pub inbound_queue_capacity: usize,

    /// Upper bound on closing the upstream session (ms)
    pub close_timeout_ms: u64,

    /// Text sent upstream to close a user turn. Empty sends a bare
    /// end-of-turn.
    pub turn_complete_text: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            speaking_timeout_ms: 2000,
            turn_debounce_ms: 5000,
            silence_timeout_ms: 1000,
            min_voiced_ms: 60,
            frame_ms: 20,
            energy_threshold: 0.015,
            inbound_queue_capacity: 5,
            close_timeout_ms: 3000,
            turn_complete_text: String::new(),
        }
    }
}

impl ConversationConfig {
    pub fn speaking_timeout(&self) -> Duration {
        Duration::from_millis(self.speaking_timeout_ms)
    }

    pub fn turn_debounce(&self) -> Duration {
        Duration::from_millis(self.turn_debounce_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms as u64)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Segmenter settings producing segments at `target_sample_rate`.
    pub fn segmenter(&self, target_sample_rate: u32) -> SegmenterConfig {
        SegmenterConfig {
            energy_threshold: self.energy_threshold,
            min_voiced_ms: self.min_voiced_ms,
            silence_timeout_ms: self.silence_timeout_ms,
            frame_ms: self.frame_ms,
            target_sample_rate,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.inbound_queue_capacity == 0 {
            anyhow::bail!("inbound_queue_capacity must be greater than 0");
        }
        if self.close_timeout_ms == 0 {
            anyhow::bail!("close_timeout_ms must be greater than 0");
        }
        self.segmenter(16000).validate()
    }
}
