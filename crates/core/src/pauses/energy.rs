use crate::decode::AudioClip;
use crate::pauses::{PauseConfig, PauseDetector, PauseError, PauseSegment};
use futures::future::BoxFuture;
use futures::FutureExt;

const FRAME_MS: u32 = 25;
const HOP_MS: u32 = 10;
/// Amplitude floor for the dB conversion.
const AMPLITUDE_FLOOR: f64 = 1e-5;
/// Dynamic range below the peak frame that is still resolved.
const TOP_DB: f64 = 80.0;

/// RMS energy of centered, zero-padded frames.
///
/// Frame `i` is centered on sample `i * hop`, so there are `1 + len / hop`
/// frames and frame times are `i * hop / sample_rate`.
pub fn frame_rms(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f64> {
    if frame_len == 0 || hop == 0 {
        return Vec::new();
    }

    let half = frame_len / 2;
    let n_frames = 1 + samples.len() / hop;
    let mut out = Vec::with_capacity(n_frames);

    for i in 0..n_frames {
        let center = i * hop;
        let start = center.saturating_sub(half);
        let end = (center + frame_len - half).min(samples.len());
        let sum_sq: f64 = samples
            .get(start..end)
            .unwrap_or(&[])
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        out.push((sum_sq / frame_len as f64).sqrt());
    }
    out
}

fn to_db_relative_to_peak(rms: &[f64]) -> Vec<f64> {
    let peak = rms.iter().copied().fold(0.0_f64, f64::max);
    let reference = 20.0 * peak.max(AMPLITUDE_FLOOR).log10();
    let db: Vec<f64> = rms
        .iter()
        .map(|&r| 20.0 * r.max(AMPLITUDE_FLOOR).log10() - reference)
        .collect();

    let max_db = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    db.into_iter().map(|d| d.max(max_db - TOP_DB)).collect()
}

/// Silent intervals found by thresholding framed RMS energy.
///
/// An interval opens at the first silent frame and closes at the next voiced
/// frame; a run still open at the end of the audio closes at the last frame.
pub fn detect_energy_pauses(
    samples: &[f32],
    sample_rate: u32,
    config: &PauseConfig,
) -> Vec<PauseSegment> {
    if sample_rate == 0 || samples.is_empty() {
        return Vec::new();
    }

    let frame_len = (sample_rate * FRAME_MS / 1000) as usize;
    let hop = (sample_rate * HOP_MS / 1000) as usize;
    let db = to_db_relative_to_peak(&frame_rms(samples, frame_len, hop));
    let frame_time = |i: usize| (i * hop) as f64 / f64::from(sample_rate);

    let mut pauses = Vec::new();
    let mut open: Option<f64> = None;

    for (i, &level) in db.iter().enumerate() {
        let silent = level < config.silence_threshold_db;
        let t = frame_time(i);
        match (silent, open) {
            (true, None) => open = Some(t),
            (false, Some(start)) => {
                open = None;
                if t - start >= config.min_pause_secs {
                    pauses.push(PauseSegment::new(start, t));
                }
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        let end = frame_time(db.len().saturating_sub(1));
        if end - start >= config.min_pause_secs {
            pauses.push(PauseSegment::new(start, end));
        }
    }

    pauses
}

#[derive(Clone, Debug, Default)]
pub struct EnergyPauseDetector {
    config: PauseConfig,
}

impl EnergyPauseDetector {
    pub fn new(config: PauseConfig) -> Self {
        Self { config }
    }
}

impl PauseDetector for EnergyPauseDetector {
    fn detect<'a>(
        &'a self,
        audio: &'a AudioClip,
    ) -> BoxFuture<'a, Result<Vec<PauseSegment>, PauseError>> {
        async move {
            if audio.format.sample_rate == 0 {
                return Err(PauseError::Detection("sample rate must be > 0".to_owned()));
            }
            Ok(detect_energy_pauses(
                &audio.samples,
                audio.format.sample_rate,
                &self.config,
            ))
        }
        .boxed()
    }

    fn config(&self) -> &PauseConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    fn tone(secs: f64) -> Vec<f32> {
        let n = (secs * f64::from(SR)) as usize;
        (0..n)
            .map(|i| (0.5 * (2.0 * std::f64::consts::PI * 220.0 * i as f64 / f64::from(SR)).sin()) as f32)
            .collect()
    }

    fn silence(secs: f64) -> Vec<f32> {
        vec![0.0; (secs * f64::from(SR)) as usize]
    }

    fn concat(parts: &[Vec<f32>]) -> Vec<f32> {
        parts.iter().flatten().copied().collect()
    }

    #[test]
    fn frame_count_matches_centered_framing() {
        assert_eq!(frame_rms(&[0.0; 1600], 400, 160).len(), 11);
        assert_eq!(frame_rms(&[], 400, 160).len(), 1);
        assert!(frame_rms(&[0.0; 10], 0, 160).is_empty());
    }

    #[test]
    fn constant_signal_has_constant_interior_rms() {
        let rms = frame_rms(&[0.5; 4000], 400, 160);
        assert!((rms[10] - 0.5).abs() < 1e-9);
        // first frame is half padding
        assert!(rms[0] < rms[10]);
    }

    #[test]
    fn finds_gap_between_tones() {
        let audio = concat(&[tone(1.0), silence(0.8), tone(1.0)]);
        let pauses = detect_energy_pauses(&audio, SR, &PauseConfig::default());
        assert_eq!(pauses.len(), 1);
        let p = pauses[0];
        assert!((p.start - 1.0).abs() < 0.03, "start {}", p.start);
        assert!((p.end - 1.8).abs() < 0.03, "end {}", p.end);
    }

    #[test]
    fn short_gaps_are_ignored() {
        let audio = concat(&[tone(1.0), silence(0.15), tone(1.0)]);
        assert!(detect_energy_pauses(&audio, SR, &PauseConfig::default()).is_empty());
    }

    #[test]
    fn trailing_silence_counts() {
        let audio = concat(&[tone(1.0), silence(1.0)]);
        let pauses = detect_energy_pauses(&audio, SR, &PauseConfig::default());
        assert_eq!(pauses.len(), 1);
        assert!((pauses[0].end - 2.0).abs() < 0.02);
    }

    #[test]
    fn digital_silence_everywhere_has_no_reference() {
        let pauses = detect_energy_pauses(&silence(2.0), SR, &PauseConfig::default());
        assert!(pauses.is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let audio = concat(&[tone(0.7), silence(0.4), tone(0.3), silence(0.6)]);
        let a = detect_energy_pauses(&audio, SR, &PauseConfig::default());
        let b = detect_energy_pauses(&audio, SR, &PauseConfig::default());
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }
}
