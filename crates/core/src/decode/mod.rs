mod normalize;
mod resample;
mod wav;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use normalize::{is_normalized_container, FfmpegNormalizer, FormatNormalizer, NormalizedAudio};
pub use resample::resample;
pub use wav::load_wav;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PcmSampleType {
    I16,
    F32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_type: PcmSampleType,
}

impl PcmFormat {
    pub const fn f32_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_type: PcmSampleType::F32,
        }
    }
}

/// Decoded recording, downmixed to mono at its own sample rate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioClip {
    pub format: PcmFormat,
    pub samples: Vec<f32>,
    /// Length of the source recording. Resampled copies keep this value.
    pub duration_secs: f64,
}

impl AudioClip {
    pub fn new(format: PcmFormat, samples: Vec<f32>) -> Self {
        let duration_secs = if format.sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / f64::from(format.sample_rate)
        };
        Self {
            format,
            samples,
            duration_secs,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("invalid pcm output: {0}")]
    InvalidPcm(String),

    #[error("invalid wav: {0}")]
    InvalidWav(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("decode task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Average interleaved channels down to one.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.to_vec(),
        n => {
            let n = usize::from(n);
            interleaved
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

pub fn duration_from_sample_count(sample_rate_hz: u32, channels: u16, sample_count: usize) -> f64 {
    if sample_rate_hz == 0 || channels == 0 {
        return 0.0;
    }
    let frames = sample_count / usize::from(channels);
    frames as f64 / f64::from(sample_rate_hz)
}
