//! Opus encode/decode for the WebRTC media tracks.

use opus::{Application, Bitrate, Channels, Decoder, Encoder};
use thiserror::Error;

/// Opus clock rate used on the media tracks.
pub const OPUS_SAMPLE_RATE: u32 = 48000;

/// Samples in one 20 ms frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Largest frame Opus can produce (120 ms at 48 kHz).
const MAX_FRAME_SAMPLES: usize = 5760;

/// Output buffer for one encoded packet.
const MAX_PACKET_BYTES: usize = 1275;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to create Opus codec: {0}")]
    Init(String),

    #[error("Expected {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Opus encoding failed: {0}")]
    Encode(String),

    #[error("Opus decoding failed: {0}")]
    Decode(String),
}

/// Mono voice encoder for outbound 20 ms frames.
pub struct OpusEncoder {
    encoder: Encoder,
}

impl OpusEncoder {
    pub fn new(bitrate: i32) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(OPUS_SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::Init(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::Bits(bitrate))
            .map_err(|e| CodecError::Init(format!("bitrate: {e}")))?;
        encoder
            .set_inband_fec(true)
            .map_err(|e| CodecError::Init(format!("fec: {e}")))?;
        encoder
            .set_packet_loss_perc(10)
            .map_err(|e| CodecError::Init(format!("packet loss: {e}")))?;

        Ok(Self { encoder })
    }

    /// Encode exactly [`OPUS_FRAME_SAMPLES`] samples.
    pub fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>, CodecError> {
        if samples.len() != OPUS_FRAME_SAMPLES {
            return Err(CodecError::FrameSize {
                expected: OPUS_FRAME_SAMPLES,
                actual: samples.len(),
            });
        }

        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .encoder
            .encode(samples, &mut output)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        output.truncate(len);
        Ok(output)
    }
}

/// Mono decoder for inbound RTP payloads. Stereo packets are downmixed.
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(OPUS_SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::Init(e.to_string()))?;
        Ok(Self { decoder })
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, CodecError> {
        let mut output = vec![0i16; MAX_FRAME_SAMPLES];
        let len = self
            .decoder
            .decode(payload, &mut output, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        output.truncate(len);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_frame() {
        let mut encoder = OpusEncoder::new(32000).unwrap();
        let mut decoder = OpusDecoder::new().unwrap();

        let samples: Vec<i16> = (0..OPUS_FRAME_SAMPLES)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let packet = encoder.encode(&samples).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() < samples.len() * 2);

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), OPUS_FRAME_SAMPLES);
    }

    #[test]
    fn test_encoder_rejects_wrong_frame_size() {
        let mut encoder = OpusEncoder::new(32000).unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 100]),
            Err(CodecError::FrameSize { expected: 960, actual: 100 })
        ));
    }
}
