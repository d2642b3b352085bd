//! Outbound Opus track as an [`AudioSink`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::core::audio::{AudioChunk, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE, OpusEncoder};
use crate::core::audio::{bytes_to_samples, resample, samples_to_bytes};
use crate::core::conversation::{AudioSink, FrameSplitter};
use crate::errors::TransportError;

const OPUS_FRAME: Duration = Duration::from_millis(20);

struct Encoding {
    encoder: OpusEncoder,
    splitter: FrameSplitter,
}

/// Encodes paced PCM frames and writes them to the peer's audio track.
///
/// Frames are re-cut to 20 ms Opus packets. Samples that do not fill a packet
/// are held for the next write.
pub struct OpusTrackSink {
    track: Arc<TrackLocalStaticSample>,
    encoding: Mutex<Encoding>,
}

impl OpusTrackSink {
    pub fn new(track: Arc<TrackLocalStaticSample>, bitrate: u32) -> Result<Self, TransportError> {
        let encoder = OpusEncoder::new(bitrate as i32)?;
        Ok(Self {
            track,
            encoding: Mutex::new(Encoding {
                encoder,
                splitter: FrameSplitter::new(OPUS_SAMPLE_RATE, 20),
            }),
        })
    }

    /// Encode every whole 20 ms packet available after appending `samples`.
    fn encode(&self, samples: &[i16]) -> Result<Vec<Bytes>, TransportError> {
        let mut encoding = self.encoding.lock();
        let frames = encoding.splitter.push(&samples_to_bytes(samples));
        let mut packets = Vec::with_capacity(frames.len());
        for frame in frames {
            let pcm = bytes_to_samples(&frame);
            debug_assert_eq!(pcm.len(), OPUS_FRAME_SAMPLES);
            packets.push(Bytes::from(encoding.encoder.encode(&pcm)?));
        }
        Ok(packets)
    }
}

#[async_trait]
impl AudioSink for OpusTrackSink {
    fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }

    async fn write_frame(&self, frame: AudioChunk, _duration: Duration) -> Result<(), TransportError> {
        let mut samples = bytes_to_samples(&frame.data);
        if frame.sample_rate != OPUS_SAMPLE_RATE {
            samples = resample(&samples, frame.sample_rate, OPUS_SAMPLE_RATE);
        }

        for data in self.encode(&samples)? {
            self.track
                .write_sample(&Sample {
                    data,
                    duration: OPUS_FRAME,
                    ..Default::default()
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    fn sink() -> OpusTrackSink {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_SAMPLE_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "test".to_owned(),
        ));
        OpusTrackSink::new(track, 32000).unwrap()
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let sink = sink();
        // 10 ms at 48 kHz
        let half = vec![100i16; OPUS_FRAME_SAMPLES / 2];

        assert!(sink.encode(&half).unwrap().is_empty());
        assert_eq!(sink.encode(&half).unwrap().len(), 1);

        // 30 ms frames: three writes make exactly four and a half packets
        let frame_30ms = vec![100i16; OPUS_FRAME_SAMPLES * 3 / 2];
        let packets: usize = (0..3).map(|_| sink.encode(&frame_30ms).unwrap().len()).sum();
        assert_eq!(packets, 4);
        assert_eq!(sink.encode(&half).unwrap().len(), 1);
    }
}
