//! Energy-based voice segmentation over a rolling PCM buffer.
//!
//! Incoming buffers are resampled to the target rate, appended to a rolling
//! buffer and cut into fixed frames. Each frame is classified as voiced or
//! silent by its RMS level. An utterance starts once enough contiguous voiced
//! audio has accumulated and ends after a run of silence.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::pcm::{
    BYTES_PER_SAMPLE, bytes_to_samples, duration_ms, resample, rms_level, samples_per_frame,
    samples_to_bytes,
};

/// Segmenter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// RMS level (0.0 - 1.0) above which a frame counts as voiced
    pub energy_threshold: f32,

    /// Contiguous voiced audio required before an utterance starts (ms)
    pub min_voiced_ms: u32,

    /// Silence that ends an active utterance (ms)
    pub silence_timeout_ms: u32,

    /// Frame unit (ms)
    pub frame_ms: u32,

    /// Sample rate of emitted segments (Hz)
    pub target_sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.015,
            min_voiced_ms: 60,
            silence_timeout_ms: 1000,
            frame_ms: 20,
            target_sample_rate: 16000,
        }
    }
}

impl SegmenterConfig {
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate,
            ..Default::default()
        }
    }

    pub fn frame_samples(&self) -> usize {
        samples_per_frame(self.target_sample_rate, self.frame_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.energy_threshold) {
            anyhow::bail!("energy_threshold must be between 0.0 and 1.0");
        }
        if self.target_sample_rate == 0 {
            anyhow::bail!("target_sample_rate must be greater than 0");
        }
        if self.frame_ms == 0 || self.frame_samples() == 0 {
            anyhow::bail!("frame_ms must yield at least one sample per frame");
        }
        if self.silence_timeout_ms < self.frame_ms {
            anyhow::bail!("silence_timeout_ms must be at least one frame");
        }
        Ok(())
    }
}

/// Voice activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Active,
}

/// One fixed-duration frame belonging to an utterance.
#[derive(Debug, Clone)]
pub struct VoiceSegment {
    /// PCM16 LE mono at `sample_rate`
    pub data: Bytes,
    pub sample_rate: u32,
    /// Utterance sequence number, starting at 1
    pub utterance: u64,
    pub voiced: bool,
    pub level: f32,
}

impl VoiceSegment {
    pub fn duration_ms(&self) -> u64 {
        duration_ms(self.data.len() / BYTES_PER_SAMPLE, self.sample_rate)
    }
}

#[derive(Debug, Clone)]
pub enum SegmenterOutput {
    VoiceStarted { utterance: u64 },
    Segment(VoiceSegment),
    SilenceTimeout { utterance: u64, voiced_ms: u64 },
}

/// Non-fatal notice about input that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentationWarning {
    #[error("dropped {len} byte buffer shorter than one sample")]
    UndersizedBuffer { len: usize },

    #[error("dropped trailing byte of {len} byte buffer")]
    TrailingByte { len: usize },

    #[error("unsupported source sample rate {rate}")]
    InvalidSampleRate { rate: u32 },
}

#[derive(Debug, Default)]
pub struct SegmentResult {
    pub outputs: Vec<SegmenterOutput>,
    pub warning: Option<SegmentationWarning>,
}

/// Rolling-buffer segmenter. One per inbound stream.
pub struct Segmenter {
    config: SegmenterConfig,
    frame_samples: usize,
    pending: Vec<i16>,
    pre_roll: Vec<Vec<i16>>,
    state: VoiceState,
    utterance: u64,
    silence_ms: u64,
    voiced_ms: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let frame_samples = config.frame_samples().max(1);
        Self {
            config,
            frame_samples,
            pending: Vec::new(),
            pre_roll: Vec::new(),
            state: VoiceState::Idle,
            utterance: 0,
            silence_ms: 0,
            voiced_ms: 0,
        }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == VoiceState::Active
    }

    /// Feed raw PCM16 LE mono captured at `source_rate`.
    pub fn process(&mut self, data: &[u8], source_rate: u32) -> SegmentResult {
        let mut result = SegmentResult::default();

        if source_rate == 0 {
            let warning = SegmentationWarning::InvalidSampleRate { rate: source_rate };
            warn!("{}", warning);
            result.warning = Some(warning);
            return result;
        }

        if data.len() < BYTES_PER_SAMPLE {
            let warning = SegmentationWarning::UndersizedBuffer { len: data.len() };
            warn!("{}", warning);
            result.warning = Some(warning);
            return result;
        }

        if data.len() % BYTES_PER_SAMPLE != 0 {
            let warning = SegmentationWarning::TrailingByte { len: data.len() };
            warn!("{}", warning);
            result.warning = Some(warning);
        }

        let samples = bytes_to_samples(data);
        let samples = resample(&samples, source_rate, self.config.target_sample_rate);
        self.pending.extend_from_slice(&samples);

        while self.pending.len() >= self.frame_samples {
            let frame: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
            self.process_frame(frame, &mut result.outputs);
        }

        result
    }

    /// End the active utterance without waiting for silent frames.
    pub fn force_silence(&mut self) -> Option<SegmenterOutput> {
        if self.state != VoiceState::Active {
            return None;
        }
        Some(self.end_utterance())
    }

    /// Drop buffered audio and return to idle.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pre_roll.clear();
        self.state = VoiceState::Idle;
        self.silence_ms = 0;
        self.voiced_ms = 0;
    }

    fn process_frame(&mut self, frame: Vec<i16>, outputs: &mut Vec<SegmenterOutput>) {
        let level = rms_level(&frame);
        let voiced = level >= self.config.energy_threshold;
        let frame_ms = self.config.frame_ms as u64;

        match self.state {
            VoiceState::Idle => {
                if !voiced {
                    self.pre_roll.clear();
                    return;
                }

                self.pre_roll.push(frame);
                let buffered_ms = self.pre_roll.len() as u64 * frame_ms;
                if buffered_ms < self.config.min_voiced_ms as u64 {
                    return;
                }

                self.utterance += 1;
                self.state = VoiceState::Active;
                self.silence_ms = 0;
                self.voiced_ms = 0;
                debug!(utterance = self.utterance, "voice started");
                outputs.push(SegmenterOutput::VoiceStarted {
                    utterance: self.utterance,
                });

                for buffered in std::mem::take(&mut self.pre_roll) {
                    let level = rms_level(&buffered);
                    self.voiced_ms += frame_ms;
                    outputs.push(self.segment(&buffered, true, level));
                }
            }
            VoiceState::Active => {
                if voiced {
                    self.silence_ms = 0;
                    self.voiced_ms += frame_ms;
                    outputs.push(self.segment(&frame, true, level));
                    return;
                }

                self.silence_ms += frame_ms;
                if self.silence_ms >= self.config.silence_timeout_ms as u64 {
                    outputs.push(self.end_utterance());
                } else {
                    outputs.push(self.segment(&frame, false, level));
                }
            }
        }
    }

    fn end_utterance(&mut self) -> SegmenterOutput {
        let output = SegmenterOutput::SilenceTimeout {
            utterance: self.utterance,
            voiced_ms: self.voiced_ms,
        };
        debug!(utterance = self.utterance, voiced_ms = self.voiced_ms, "silence timeout");
        self.state = VoiceState::Idle;
        self.silence_ms = 0;
        self.voiced_ms = 0;
        self.pre_roll.clear();
        output
    }

    fn segment(&self, frame: &[i16], voiced: bool, level: f32) -> SegmenterOutput {
        SegmenterOutput::Segment(VoiceSegment {
            data: samples_to_bytes(frame),
            sample_rate: self.config.target_sample_rate,
            utterance: self.utterance,
            voiced,
            level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn tone(ms: u32, rate: u32) -> Vec<u8> {
        let samples: Vec<i16> = (0..samples_per_frame(rate, ms))
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect();
        samples_to_bytes(&samples).to_vec()
    }

    fn silence(ms: u32, rate: u32) -> Vec<u8> {
        vec![0u8; samples_per_frame(rate, ms) * BYTES_PER_SAMPLE]
    }

    fn segments(outputs: &[SegmenterOutput]) -> Vec<&VoiceSegment> {
        outputs
            .iter()
            .filter_map(|o| match o {
                SegmenterOutput::Segment(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SegmenterConfig::default().validate().is_ok());
        let bad = SegmenterConfig {
            energy_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_audio_shorter_than_a_frame_emits_nothing() {
        let mut segmenter = Segmenter::new(SegmenterConfig {
            min_voiced_ms: 20,
            ..SegmenterConfig::new(RATE)
        });
        let result = segmenter.process(&tone(10, RATE), RATE);
        assert!(result.outputs.is_empty());
        assert!(result.warning.is_none());
        assert_eq!(segmenter.state(), VoiceState::Idle);
    }

    #[test]
    fn test_buffer_shorter_than_a_sample_is_dropped() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let result = segmenter.process(&[42], RATE);
        assert!(result.outputs.is_empty());
        assert_eq!(
            result.warning,
            Some(SegmentationWarning::UndersizedBuffer { len: 1 })
        );
    }

    #[test]
    fn test_trailing_odd_byte_is_reported() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let mut data = silence(20, RATE);
        data.push(1);
        let result = segmenter.process(&data, RATE);
        assert!(matches!(
            result.warning,
            Some(SegmentationWarning::TrailingByte { .. })
        ));
    }

    #[test]
    fn test_voice_below_minimum_does_not_start_utterance() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let mut outputs = segmenter.process(&tone(40, RATE), RATE).outputs;
        outputs.extend(segmenter.process(&silence(20, RATE), RATE).outputs);
        outputs.extend(segmenter.process(&tone(40, RATE), RATE).outputs);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_minimum_voice_starts_utterance_with_pre_roll() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let outputs = segmenter.process(&tone(60, RATE), RATE).outputs;

        assert!(matches!(
            outputs[0],
            SegmenterOutput::VoiceStarted { utterance: 1 }
        ));
        let segs = segments(&outputs);
        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| s.voiced && s.utterance == 1));
        assert!(segs.iter().all(|s| s.duration_ms() == 20));
        assert!(segmenter.is_active());
    }

    #[test]
    fn test_utterances_separated_by_silence_are_not_merged() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let mut outputs = Vec::new();
        outputs.extend(segmenter.process(&tone(60, RATE), RATE).outputs);
        outputs.extend(segmenter.process(&silence(1000, RATE), RATE).outputs);
        outputs.extend(segmenter.process(&tone(60, RATE), RATE).outputs);
        outputs.extend(segmenter.process(&silence(1000, RATE), RATE).outputs);

        let timeouts: Vec<u64> = outputs
            .iter()
            .filter_map(|o| match o {
                SegmenterOutput::SilenceTimeout { utterance, voiced_ms } => {
                    assert_eq!(*voiced_ms, 60);
                    Some(*utterance)
                }
                _ => None,
            })
            .collect();
        assert_eq!(timeouts, vec![1, 2]);

        let voiced: Vec<u64> = segments(&outputs)
            .iter()
            .filter(|s| s.voiced)
            .map(|s| s.utterance)
            .collect();
        assert_eq!(voiced, vec![1, 1, 1, 2, 2, 2]);

        let first_timeout = outputs
            .iter()
            .position(|o| matches!(o, SegmenterOutput::SilenceTimeout { .. }))
            .unwrap();
        let second_start = outputs
            .iter()
            .position(|o| matches!(o, SegmenterOutput::VoiceStarted { utterance: 2 }))
            .unwrap();
        assert!(first_timeout < second_start);
    }

    #[test]
    fn test_resamples_to_target_rate() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        let outputs = segmenter.process(&tone(60, 48000), 48000).outputs;
        let segs = segments(&outputs);
        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| s.sample_rate == RATE));
        assert!(segs.iter().all(|s| s.data.len() == 320 * BYTES_PER_SAMPLE));
    }

    #[test]
    fn test_force_silence_ends_active_utterance() {
        let mut segmenter = Segmenter::new(SegmenterConfig::new(RATE));
        assert!(segmenter.force_silence().is_none());
        segmenter.process(&tone(60, RATE), RATE);
        assert!(matches!(
            segmenter.force_silence(),
            Some(SegmenterOutput::SilenceTimeout { utterance: 1, .. })
        ));
        assert_eq!(segmenter.state(), VoiceState::Idle);
    }
}
