//! Pause detection and aggregation.
//!
//! Two sources feed the aggregator: framed RMS energy over the waveform
//! ([`EnergyPauseDetector`]) and gaps between timed transcript segments
//! ([`detect_transcript_pauses`]). [`PauseMergePolicy`] decides which of them
//! ends up in the reported [`PauseMetrics`].

mod energy;

use crate::asr::TranscriptSegment;
use crate::decode::AudioClip;
use crate::scoring::round_to;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use energy::{detect_energy_pauses, frame_rms, EnergyPauseDetector};

const LOG_TARGET: &str = "pauses";

pub const DEFAULT_MIN_PAUSE_SECS: f64 = 0.3;
pub const DEFAULT_SILENCE_THRESHOLD_DB: f64 = -40.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PauseSegment {
    pub start: f64,
    pub end: f64,
}

impl PauseSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PauseMetrics {
    pub total_pause_duration: f64,
    pub pause_count: usize,
    pub pause_ratio: f64,
    pub average_pause_duration: f64,
    pub longest_pause: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PauseMergePolicy {
    /// Waveform pauses are authoritative; transcript gaps are only consulted
    /// when there is no transcript timing at all (and then there are none).
    #[default]
    EnergyPrimary,
    /// Interleave both sources, coalescing overlapping intervals.
    Union,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PauseConfig {
    pub min_pause_secs: f64,
    pub silence_threshold_db: f64,
    pub merge_policy: PauseMergePolicy,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            min_pause_secs: DEFAULT_MIN_PAUSE_SECS,
            silence_threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            merge_policy: PauseMergePolicy::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PauseError {
    #[error("pause detection failed: {0}")]
    Detection(String),
}

pub trait PauseDetector: Send + Sync {
    fn detect<'a>(
        &'a self,
        audio: &'a AudioClip,
    ) -> BoxFuture<'a, Result<Vec<PauseSegment>, PauseError>>;

    fn config(&self) -> &PauseConfig;
}

/// Gaps of at least `min_pause_secs` between consecutive transcript segments.
pub fn detect_transcript_pauses(
    segments: &[TranscriptSegment],
    min_pause_secs: f64,
) -> Vec<PauseSegment> {
    segments
        .windows(2)
        .filter_map(|pair| {
            let gap = pair[1].start - pair[0].end;
            (gap >= min_pause_secs).then(|| PauseSegment::new(pair[0].end, pair[1].start))
        })
        .collect()
}

/// Choose the pause list that feeds the statistics.
pub fn merge_pauses(
    energy: Vec<PauseSegment>,
    transcript: &[TranscriptSegment],
    config: &PauseConfig,
) -> Vec<PauseSegment> {
    if transcript.is_empty() {
        return energy;
    }

    let gaps = detect_transcript_pauses(transcript, config.min_pause_secs);
    match config.merge_policy {
        PauseMergePolicy::EnergyPrimary => {
            tracing::debug!(
                target: LOG_TARGET,
                transcript_gaps = gaps.len(),
                "using waveform pauses, transcript gaps ignored"
            );
            energy
        }
        PauseMergePolicy::Union => union(energy, gaps),
    }
}

fn union(energy: Vec<PauseSegment>, gaps: Vec<PauseSegment>) -> Vec<PauseSegment> {
    let mut all: Vec<PauseSegment> = energy.into_iter().chain(gaps).collect();
    all.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut merged: Vec<PauseSegment> = Vec::with_capacity(all.len());
    for seg in all {
        match merged.last_mut() {
            Some(last) if seg.start <= last.end => last.end = last.end.max(seg.end),
            _ => merged.push(seg),
        }
    }
    merged
}

/// Summary statistics over a pause list.
pub fn aggregate(pauses: &[PauseSegment], total_duration_secs: f64) -> PauseMetrics {
    let total: f64 = pauses.iter().map(PauseSegment::duration).sum();
    let count = pauses.len();
    let average = if count > 0 { total / count as f64 } else { 0.0 };
    let longest = pauses
        .iter()
        .map(PauseSegment::duration)
        .fold(0.0_f64, f64::max);
    let ratio = if total_duration_secs > 0.0 {
        total / total_duration_secs
    } else {
        0.0
    };

    PauseMetrics {
        total_pause_duration: round_to(total, 3),
        pause_count: count,
        pause_ratio: round_to(ratio, 4),
        average_pause_duration: round_to(average, 3),
        longest_pause: round_to(longest, 3),
    }
}

pub fn analyze_pauses(
    energy: Vec<PauseSegment>,
    transcript: &[TranscriptSegment],
    total_duration_secs: f64,
    config: &PauseConfig,
) -> PauseMetrics {
    let chosen = merge_pauses(energy, transcript, config);
    let metrics = aggregate(&chosen, total_duration_secs);

    tracing::info!(
        target: LOG_TARGET,
        count = metrics.pause_count,
        ratio = metrics.pause_ratio,
        "pause analysis complete"
    );

    metrics
}

/// Speaking time left after removing pauses. Not clamped: over-counted
/// pauses produce a negative value.
pub fn speech_duration(total_duration_secs: f64, pauses: &PauseMetrics) -> f64 {
    total_duration_secs - pauses.total_pause_duration
}
