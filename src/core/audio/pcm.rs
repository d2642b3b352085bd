//! PCM helpers: byte/sample conversion, linear resampling and levels.
//!
//! All audio inside the gateway is 16-bit little-endian mono PCM.

use bytes::Bytes;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian 16-bit PCM.
pub fn samples_to_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

/// Number of samples a linear resample of `len` samples produces.
///
/// Depends only on the input length and the two rates.
pub fn resampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 || to_rate == 0 {
        return 0;
    }
    ((len as u64 * to_rate as u64) / from_rate as u64) as usize
}

/// Resample with linear interpolation between neighbouring samples.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let out_len = resampled_len(samples.len(), from_rate, to_rate);
    if out_len == 0 || samples.is_empty() {
        return Vec::new();
    }

    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * step;
            let index = position.floor() as usize;
            if index >= last {
                return samples[last];
            }
            let frac = position - index as f64;
            let a = samples[index] as f64;
            let b = samples[index + 1] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Resample a PCM byte buffer, returning PCM bytes.
pub fn resample_bytes(data: &[u8], from_rate: u32, to_rate: u32) -> Bytes {
    if from_rate == to_rate {
        let even = data.len() - data.len() % BYTES_PER_SAMPLE;
        return Bytes::copy_from_slice(&data[..even]);
    }
    samples_to_bytes(&resample(&bytes_to_samples(data), from_rate, to_rate))
}

/// Root-mean-square level normalized to `0.0..=1.0`.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Samples in one frame of `frame_ms` at `sample_rate`.
pub fn samples_per_frame(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}

/// Audio duration in milliseconds of `samples` at `sample_rate`.
pub fn duration_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (samples as u64 * 1000) / sample_rate as u64
}
