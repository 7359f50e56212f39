mod analyzer;

use crate::decode::AudioClip;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use analyzer::{
    jitter_local, pitch_track, place_pulses, shimmer_local, PitchFrame, Pulse,
    SignalAcousticAnalyzer,
};

pub const PITCH_FLOOR_HZ: f64 = 75.0;
pub const PITCH_CEILING_HZ: f64 = 500.0;

/// Voice measurements for one recording.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioMetrics {
    /// Hz, over voiced frames only.
    pub pitch_mean: f64,
    pub pitch_std: f64,
    /// Percent.
    pub jitter_local: f64,
    /// Percent.
    pub shimmer_local: f64,
    /// dB.
    pub harmonics_to_noise_ratio: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum AcousticError {
    #[error("unsupported audio: {0}")]
    UnsupportedAudio(String),

    #[error("analysis task failed: {0}")]
    Task(String),
}

/// A single measurement that could not be taken. Never fatal: the analyzer
/// reports 0 for it instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("no voiced frames")]
    NoVoicedFrames,

    #[error("need at least {needed} usable pulses, found {found}")]
    TooFewPulses { needed: usize, found: usize },

    #[error("result is not finite")]
    NonFinite,
}

pub trait AcousticAnalyzer: Send + Sync {
    fn analyze<'a>(&'a self, audio: &'a AudioClip) -> BoxFuture<'a, Result<AudioMetrics, AcousticError>>;
}
