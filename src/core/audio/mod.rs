//! Audio utilities shared by the conversation loop and the peer transport.
//!
//! - `pcm`: byte/sample conversion, linear resampling, levels
//! - `segmenter`: energy-based voice segmentation
//! - `codec`: Opus encoder/decoder for WebRTC tracks

pub mod codec;
pub mod pcm;
pub mod segmenter;

use bytes::Bytes;

pub use codec::{CodecError, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE, OpusDecoder, OpusEncoder};
pub use pcm::{
    bytes_to_samples, resample, resample_bytes, rms_level, samples_per_frame, samples_to_bytes,
};
pub use segmenter::{
    SegmentResult, SegmentationWarning, Segmenter, SegmenterConfig, SegmenterOutput,
    VoiceSegment, VoiceState,
};

/// A chunk of PCM16 LE mono audio tagged with its sample rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self {
            data: data.into(),
            sample_rate,
        }
    }

    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: samples_to_bytes(samples),
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        pcm::duration_ms(self.data.len() / pcm::BYTES_PER_SAMPLE, self.sample_rate)
    }
}
