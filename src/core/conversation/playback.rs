//! Outbound audio path: frame splitting, the clearable playback queue and the
//! sink seam the peer implements.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::audio::AudioChunk;
use crate::core::audio::pcm::{BYTES_PER_SAMPLE, samples_per_frame};
use crate::errors::TransportError;

/// Destination for paced model audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Rate frames are delivered at.
    fn sample_rate(&self) -> u32;

    /// Write one frame of PCM16 mono lasting `duration`.
    async fn write_frame(&self, frame: AudioChunk, duration: Duration) -> Result<(), TransportError>;
}

/// Cuts a PCM byte stream into fixed-size frames, carrying the remainder.
#[derive(Debug)]
pub struct FrameSplitter {
    frame_bytes: usize,
    carry: Vec<u8>,
}

impl FrameSplitter {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        Self {
            frame_bytes: samples_per_frame(sample_rate, frame_ms).max(1) * BYTES_PER_SAMPLE,
            carry: Vec::new(),
        }
    }

    pub fn push(&mut self, pcm: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(pcm);
        let whole = self.carry.len() / self.frame_bytes * self.frame_bytes;
        let frames = self
            .carry
            .drain(..whole)
            .collect::<Vec<u8>>()
            .chunks(self.frame_bytes)
            .map(Bytes::copy_from_slice)
            .collect();
        frames
    }

    /// Pad the remainder with silence into one last frame.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.carry.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.carry);
        frame.resize(self.frame_bytes, 0);
        Some(Bytes::from(frame))
    }

    pub fn clear(&mut self) {
        self.carry.clear();
    }
}

/// Unbounded single-consumer frame queue.
///
/// `clear` bumps an epoch so a frame popped before the clear but not yet
/// written can be recognised as stale and discarded.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: Bytes) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.frames.lock().push_back(frame);
        self.notify.notify_one();
    }

    /// Wait for the next frame. `None` once closed.
    pub async fn pop(&self) -> Option<(u64, Bytes)> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            {
                let mut frames = self.frames.lock();
                if let Some(frame) = frames.pop_front() {
                    return Some((self.epoch.load(Ordering::SeqCst), frame));
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drop every queued frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = frames.len();
        frames.clear();
        dropped
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}
