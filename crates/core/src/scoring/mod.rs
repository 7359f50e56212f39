//! Confidence scoring.
//!
//! Turns the three raw metric objects into four bounded component scores and
//! one weighted overall score. Everything here is a pure function of its
//! inputs plus an immutable [`ScoringWeights`] / [`ScoringProfile`] pair.

pub mod bands;
pub mod normalize;

use crate::acoustics::AudioMetrics;
use crate::fluency::FluencyMetrics;
use crate::pauses::PauseMetrics;
use serde::{Deserialize, Serialize};

pub use bands::{BandDirection, BandTable, BandTail, FILLER_RATIO_BANDS, HNR_BANDS, JITTER_BANDS, SHIMMER_BANDS};
pub use normalize::{clamp_linear, gaussian_proximity, round_to, NEUTRAL_SCORE};

const LOG_TARGET: &str = "scoring";
const SCORE_DECIMALS: u32 = 2;

const JITTER_WEIGHT: f64 = 0.4;
const SHIMMER_WEIGHT: f64 = 0.4;
const HNR_WEIGHT: f64 = 0.2;

const WPM_SHARE: f64 = 0.6;
const PAUSE_SHARE: f64 = 0.4;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceScore {
    pub overall_score: f64,
    pub pitch_score: f64,
    pub voice_quality_score: f64,
    pub fluency_score: f64,
    pub pace_score: f64,
}

/// Relative weight of each component in the overall score.
///
/// Callers supplying their own weights are responsible for them summing to
/// 1.0; otherwise the overall score can leave `[0, 100]`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    pub pitch: f64,
    pub voice_quality: f64,
    pub fluency: f64,
    pub pace: f64,
}

impl ScoringWeights {
    pub const fn new(pitch: f64, voice_quality: f64, fluency: f64, pace: f64) -> Self {
        Self {
            pitch,
            voice_quality,
            fluency,
            pace,
        }
    }

    pub fn total(&self) -> f64 {
        self.pitch + self.voice_quality + self.fluency + self.pace
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::new(0.20, 0.25, 0.30, 0.25)
    }
}

/// Target values and tolerances for the Gaussian-scored dimensions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoringProfile {
    /// Pitch coefficient of variation, percent.
    pub pitch_cv_optimal: f64,
    pub pitch_cv_sigma: f64,
    pub wpm_optimal: f64,
    pub wpm_sigma: f64,
    pub pause_ratio_optimal: f64,
    pub pause_ratio_sigma: f64,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        Self {
            pitch_cv_optimal: 20.0,
            pitch_cv_sigma: 10.0,
            wpm_optimal: 130.0,
            wpm_sigma: 30.0,
            pause_ratio_optimal: 0.20,
            pause_ratio_sigma: 0.10,
        }
    }
}

pub fn pitch_score(audio: &AudioMetrics, profile: &ScoringProfile) -> f64 {
    if audio.pitch_mean <= 0.0 {
        // No voiced signal.
        return NEUTRAL_SCORE;
    }

    let pitch_cv = audio.pitch_std / audio.pitch_mean * 100.0;
    let score = gaussian_proximity(pitch_cv, profile.pitch_cv_optimal, profile.pitch_cv_sigma);
    score.clamp(0.0, 100.0)
}

pub fn voice_quality_score(audio: &AudioMetrics) -> f64 {
    let jitter = JITTER_BANDS.score(audio.jitter_local);
    let shimmer = SHIMMER_BANDS.score(audio.shimmer_local);
    let hnr = HNR_BANDS.score(audio.harmonics_to_noise_ratio);
    jitter * JITTER_WEIGHT + shimmer * SHIMMER_WEIGHT + hnr * HNR_WEIGHT
}

pub fn fluency_score(fluency: &FluencyMetrics) -> f64 {
    if fluency.total_words == 0 {
        return NEUTRAL_SCORE;
    }

    let fillers_per_hundred = fluency.filler_count as f64 / fluency.total_words as f64 * 100.0;
    FILLER_RATIO_BANDS.score(fillers_per_hundred)
}

pub fn pace_score(fluency: &FluencyMetrics, pauses: &PauseMetrics, profile: &ScoringProfile) -> f64 {
    let wpm = gaussian_proximity(fluency.words_per_minute, profile.wpm_optimal, profile.wpm_sigma);
    let pause = gaussian_proximity(
        pauses.pause_ratio,
        profile.pause_ratio_optimal,
        profile.pause_ratio_sigma,
    );
    wpm * WPM_SHARE + pause * PAUSE_SHARE
}

/// Weighted-sum scorer over the four confidence dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConfidenceScorer {
    weights: ScoringWeights,
    profile: ScoringProfile,
}

impl ConfidenceScorer {
    pub fn new(weights: ScoringWeights, profile: ScoringProfile) -> Self {
        Self { weights, profile }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn profile(&self) -> &ScoringProfile {
        &self.profile
    }

    pub fn score(
        &self,
        audio: &AudioMetrics,
        fluency: &FluencyMetrics,
        pauses: &PauseMetrics,
    ) -> ConfidenceScore {
        let pitch = pitch_score(audio, &self.profile);
        let voice_quality = voice_quality_score(audio);
        let fluency_component = fluency_score(fluency);
        let pace = pace_score(fluency, pauses, &self.profile);

        let w = &self.weights;
        let overall = pitch * w.pitch
            + voice_quality * w.voice_quality
            + fluency_component * w.fluency
            + pace * w.pace;

        let score = ConfidenceScore {
            overall_score: round_to(overall, SCORE_DECIMALS),
            pitch_score: round_to(pitch, SCORE_DECIMALS),
            voice_quality_score: round_to(voice_quality, SCORE_DECIMALS),
            fluency_score: round_to(fluency_component, SCORE_DECIMALS),
            pace_score: round_to(pace, SCORE_DECIMALS),
        };

        tracing::info!(
            target: LOG_TARGET,
            overall = score.overall_score,
            pitch = score.pitch_score,
            voice_quality = score.voice_quality_score,
            fluency = score.fluency_score,
            pace = score.pace_score,
            "confidence score calculated"
        );

        score
    }
}

/// Score with the default profile and either the given or the default weights.
pub fn calculate_confidence_score(
    audio: &AudioMetrics,
    fluency: &FluencyMetrics,
    pauses: &PauseMetrics,
    weights: Option<ScoringWeights>,
) -> ConfidenceScore {
    ConfidenceScorer::new(weights.unwrap_or_default(), ScoringProfile::default())
        .score(audio, fluency, pauses)
}
