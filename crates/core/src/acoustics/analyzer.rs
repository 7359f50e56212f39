use crate::acoustics::{
    AcousticAnalyzer, AcousticError, AudioMetrics, MeasurementError, PITCH_CEILING_HZ,
    PITCH_FLOOR_HZ,
};
use crate::decode::AudioClip;
use futures::future::BoxFuture;
use futures::FutureExt;

const LOG_TARGET: &str = "acoustics";

const FRAME_SECS: f64 = 0.040;
const HOP_SECS: f64 = 0.010;
/// Minimum normalized autocorrelation for a frame to count as voiced.
const VOICING_THRESHOLD: f64 = 0.45;
/// Frames quieter than this fraction of the global peak are unvoiced.
const SILENCE_FRACTION: f64 = 0.03;
/// A shorter lag wins over the global best when it reaches this fraction of it.
const OCTAVE_TOLERANCE: f64 = 0.9;
const MAX_PERIOD_FACTOR: f64 = 1.3;
const MAX_AMPLITUDE_FACTOR: f64 = 1.6;
const PULSE_SEARCH_FRACTION: f64 = 0.2;
/// Caps HNR at 40 dB.
const MAX_CORRELATION: f64 = 0.9999;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchFrame {
    /// First sample of the frame.
    pub start: usize,
    pub len: usize,
    /// Fundamental frequency in Hz, `None` when unvoiced.
    pub f0: Option<f64>,
    /// Normalized autocorrelation at the chosen lag.
    pub correlation: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pulse {
    /// Sample holding the largest magnitude.
    pub index: usize,
    /// Interpolated peak time in seconds, between samples.
    pub time: f64,
    /// Interpolated peak magnitude.
    pub amplitude: f64,
}

fn normalized_autocorrelation(x: &[f64], min_lag: usize, max_lag: usize) -> Vec<f64> {
    let n = x.len();
    let mut energy = Vec::with_capacity(n + 1);
    energy.push(0.0);
    for &v in x {
        let last = energy[energy.len() - 1];
        energy.push(last + v * v);
    }

    (min_lag..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let num: f64 = x[..n - lag].iter().zip(&x[lag..]).map(|(a, b)| a * b).sum();
            let head = energy[n - lag];
            let tail = energy[n] - energy[lag];
            if head > 0.0 && tail > 0.0 {
                num / (head * tail).sqrt()
            } else {
                0.0
            }
        })
        .collect()
}

fn parabolic_offset(prev: f64, peak: f64, next: f64) -> f64 {
    let denom = prev - 2.0 * peak + next;
    if denom == 0.0 {
        return 0.0;
    }
    (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
}

/// Vertex of the parabola through three samples around a peak: the
/// fractional offset from the middle sample and the height there.
fn refine_peak(prev: f64, peak: f64, next: f64) -> (f64, f64) {
    let offset = parabolic_offset(prev, peak, next);
    (offset, peak - 0.25 * (prev - next) * offset)
}

fn analyze_frame(
    frame: &[f32],
    start: usize,
    sample_rate: f64,
    lags: (usize, usize),
    global_peak: f64,
) -> PitchFrame {
    let unvoiced = |correlation: f64| PitchFrame {
        start,
        len: frame.len(),
        f0: None,
        correlation,
    };

    let peak = frame.iter().map(|s| f64::from(s.abs())).fold(0.0_f64, f64::max);
    if peak <= 0.0 || peak < SILENCE_FRACTION * global_peak {
        return unvoiced(0.0);
    }

    let mean = frame.iter().map(|&s| f64::from(s)).sum::<f64>() / frame.len() as f64;
    let centered: Vec<f64> = frame.iter().map(|&s| f64::from(s) - mean).collect();
    let r = normalized_autocorrelation(&centered, lags.0, lags.1);

    let best = r.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if best <= 0.0 {
        return unvoiced(0.0);
    }

    let is_local_peak = |i: usize| {
        let prev = if i == 0 { f64::NEG_INFINITY } else { r[i - 1] };
        let next = r.get(i + 1).copied().unwrap_or(f64::NEG_INFINITY);
        r[i] >= prev && r[i] >= next
    };
    let Some(i) = (0..r.len()).find(|&i| r[i] >= OCTAVE_TOLERANCE * best && is_local_peak(i)) else {
        return unvoiced(best);
    };

    let offset = if i > 0 && i + 1 < r.len() {
        parabolic_offset(r[i - 1], r[i], r[i + 1])
    } else {
        0.0
    };
    let lag = (lags.0 + i) as f64 + offset;
    let f0 = sample_rate / lag;

    if r[i] < VOICING_THRESHOLD || !(PITCH_FLOOR_HZ..=PITCH_CEILING_HZ).contains(&f0) {
        return unvoiced(r[i]);
    }

    PitchFrame {
        start,
        len: frame.len(),
        f0: Some(f0),
        correlation: r[i],
    }
}

/// Frame-by-frame F0 estimate over 40 ms frames with a 10 ms hop.
pub fn pitch_track(samples: &[f32], sample_rate: u32) -> Vec<PitchFrame> {
    if sample_rate == 0 {
        return Vec::new();
    }
    let sr = f64::from(sample_rate);
    let frame_len = (FRAME_SECS * sr).round() as usize;
    let hop = ((HOP_SECS * sr).round() as usize).max(1);
    let min_lag = ((sr / PITCH_CEILING_HZ).floor() as usize).max(1);
    let max_lag = ((sr / PITCH_FLOOR_HZ).ceil() as usize).min(frame_len.saturating_sub(2));
    if samples.len() < frame_len || min_lag + 2 > max_lag {
        return Vec::new();
    }

    let global_peak = samples.iter().map(|s| f64::from(s.abs())).fold(0.0_f64, f64::max);
    let n_frames = (samples.len() - frame_len) / hop + 1;

    (0..n_frames)
        .map(|i| {
            let start = i * hop;
            analyze_frame(
                &samples[start..start + frame_len],
                start,
                sr,
                (min_lag, max_lag),
                global_peak,
            )
        })
        .collect()
}

fn abs_argmax(samples: &[f32], lo: usize, hi: usize) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, s) in samples.get(lo..hi)?.iter().enumerate() {
        let a = s.abs();
        match best {
            Some((_, b)) if a <= b => {}
            _ => best = Some((lo + i, a)),
        }
    }
    best.map(|(i, _)| i)
}

fn run_pulses(samples: &[f32], sr: f64, run: &[PitchFrame]) -> Vec<Pulse> {
    let mut pulses = Vec::new();
    let (Some(first), Some(last)) = (run.first(), run.last()) else {
        return pulses;
    };
    let start = first.start;
    let end = (last.start + last.len).min(samples.len());

    let period_at = |pos: usize| -> f64 {
        let i = run.partition_point(|f| f.start <= pos).saturating_sub(1);
        run[i].f0.map_or(0.0, |f0| sr / f0)
    };
    let magnitude = |i: usize| f64::from(samples[i].abs());
    let pulse = |index: usize| {
        let peak = magnitude(index);
        let (offset, amplitude) = if index > 0 && index + 1 < samples.len() {
            refine_peak(magnitude(index - 1), peak, magnitude(index + 1))
        } else {
            (0.0, peak)
        };
        Pulse {
            index,
            time: (index as f64 + offset) / sr,
            amplitude,
        }
    };

    // voiced frames overhang silence at onsets and offsets
    let floor = SILENCE_FRACTION
        * samples
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|s| f64::from(s.abs()))
            .fold(0.0_f64, f64::max);
    let audible = |i: usize| {
        let m = magnitude(i);
        m > 0.0 && m >= floor
    };

    let first_period = period_at(start).round() as usize;
    if first_period == 0 {
        return pulses;
    }
    let mut window = start;
    let mut pos = loop {
        let hi = (window + first_period).min(end);
        let Some(i) = abs_argmax(samples, window, hi) else {
            return pulses;
        };
        if audible(i) {
            break i;
        }
        window = hi;
    };
    pulses.push(pulse(pos));

    loop {
        let period = period_at(pos);
        if period <= 0.0 {
            break;
        }
        let radius = (period * PULSE_SEARCH_FRACTION).round().max(1.0) as usize;
        let expected = pos + period.round() as usize;
        let lo = expected.saturating_sub(radius).max(pos + 1);
        let hi = expected + radius + 1;
        if hi > end {
            break;
        }
        let Some(next) = abs_argmax(samples, lo, hi) else {
            break;
        };
        if !audible(next) {
            break;
        }
        pulses.push(pulse(next));
        pos = next;
    }

    pulses
}

/// Glottal pulse estimates, one list per contiguous voiced stretch.
pub fn place_pulses(samples: &[f32], sample_rate: u32, frames: &[PitchFrame]) -> Vec<Vec<Pulse>> {
    if sample_rate == 0 {
        return Vec::new();
    }
    let sr = f64::from(sample_rate);
    frames
        .split(|f| f.f0.is_none())
        .filter(|run| !run.is_empty())
        .map(|run| run_pulses(samples, sr, run))
        .filter(|p| p.len() > 1)
        .collect()
}

fn finite(value: f64) -> Result<f64, MeasurementError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MeasurementError::NonFinite)
    }
}

fn within_factor(a: f64, b: f64, factor: f64) -> bool {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    lo > 0.0 && hi / lo <= factor
}

/// Mean absolute difference between consecutive periods over the mean
/// period, in percent.
pub fn jitter_local(runs: &[Vec<Pulse>]) -> Result<f64, MeasurementError> {
    let period_range = (1.0 / PITCH_CEILING_HZ)..=(1.0 / PITCH_FLOOR_HZ);
    let mut period_sum = 0.0;
    let mut period_count = 0usize;
    let mut diff_sum = 0.0;
    let mut diff_count = 0usize;

    for run in runs {
        let periods: Vec<Option<f64>> = run
            .windows(2)
            .map(|w| {
                let t = w[1].time - w[0].time;
                period_range.contains(&t).then_some(t)
            })
            .collect();

        for &t in periods.iter().flatten() {
            period_sum += t;
            period_count += 1;
        }
        for pair in periods.windows(2) {
            if let [Some(a), Some(b)] = *pair {
                if within_factor(a, b, MAX_PERIOD_FACTOR) {
                    diff_sum += (a - b).abs();
                    diff_count += 1;
                }
            }
        }
    }

    if diff_count == 0 {
        return Err(MeasurementError::TooFewPulses {
            needed: 3,
            found: runs.iter().map(Vec::len).sum(),
        });
    }
    let mean_period = period_sum / period_count as f64;
    finite(diff_sum / diff_count as f64 / mean_period * 100.0)
}

/// Mean absolute difference between consecutive pulse amplitudes over the
/// mean amplitude, in percent.
pub fn shimmer_local(runs: &[Vec<Pulse>]) -> Result<f64, MeasurementError> {
    let mut amp_sum = 0.0;
    let mut amp_count = 0usize;
    let mut diff_sum = 0.0;
    let mut diff_count = 0usize;

    for run in runs {
        for p in run {
            amp_sum += p.amplitude;
            amp_count += 1;
        }
        for w in run.windows(2) {
            let (a, b) = (w[0].amplitude, w[1].amplitude);
            if within_factor(a, b, MAX_AMPLITUDE_FACTOR) {
                diff_sum += (a - b).abs();
                diff_count += 1;
            }
        }
    }

    if diff_count == 0 {
        return Err(MeasurementError::TooFewPulses {
            needed: 2,
            found: amp_count,
        });
    }
    finite(diff_sum / diff_count as f64 / (amp_sum / amp_count as f64) * 100.0)
}

fn pitch_stats(frames: &[PitchFrame]) -> Result<(f64, f64), MeasurementError> {
    let voiced: Vec<f64> = frames.iter().filter_map(|f| f.f0).collect();
    if voiced.is_empty() {
        return Err(MeasurementError::NoVoicedFrames);
    }
    let n = voiced.len() as f64;
    let mean = voiced.iter().sum::<f64>() / n;
    let var = voiced.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n;
    Ok((finite(mean)?, finite(var.sqrt())?))
}

fn harmonicity(frames: &[PitchFrame]) -> Result<f64, MeasurementError> {
    let hnr: Vec<f64> = frames
        .iter()
        .filter(|f| f.f0.is_some())
        .map(|f| {
            let r = f.correlation.clamp(f64::MIN_POSITIVE, MAX_CORRELATION);
            10.0 * (r / (1.0 - r)).log10()
        })
        .collect();
    if hnr.is_empty() {
        return Err(MeasurementError::NoVoicedFrames);
    }
    finite(hnr.iter().sum::<f64>() / hnr.len() as f64)
}

fn or_zero<T: Default>(measurement: &str, result: Result<T, MeasurementError>) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!(target: LOG_TARGET, measurement, error = %e, "measurement unavailable, using 0");
        T::default()
    })
}

/// Autocorrelation pitch tracker plus pulse-based perturbation measures.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalAcousticAnalyzer;

impl SignalAcousticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn measure(&self, samples: &[f32], sample_rate: u32) -> AudioMetrics {
        let frames = pitch_track(samples, sample_rate);
        let (pitch_mean, pitch_std) = or_zero("pitch", pitch_stats(&frames));
        let runs = place_pulses(samples, sample_rate, &frames);

        AudioMetrics {
            pitch_mean,
            pitch_std,
            jitter_local: or_zero("jitter", jitter_local(&runs)),
            shimmer_local: or_zero("shimmer", shimmer_local(&runs)),
            harmonics_to_noise_ratio: or_zero("hnr", harmonicity(&frames)),
        }
    }
}

impl AcousticAnalyzer for SignalAcousticAnalyzer {
    fn analyze<'a>(&'a self, audio: &'a AudioClip) -> BoxFuture<'a, Result<AudioMetrics, AcousticError>> {
        async move {
            if audio.format.sample_rate == 0 || audio.format.channels != 1 {
                return Err(AcousticError::UnsupportedAudio(format!(
                    "expected mono audio with a sample rate, got {} Hz x{}",
                    audio.format.sample_rate, audio.format.channels
                )));
            }

            let analyzer = *self;
            let samples = audio.samples.clone();
            let sample_rate = audio.format.sample_rate;
            let metrics = tokio::task::spawn_blocking(move || analyzer.measure(&samples, sample_rate))
                .await
                .map_err(|e| AcousticError::Task(e.to_string()))?;

            tracing::info!(
                target: LOG_TARGET,
                pitch_mean = metrics.pitch_mean,
                jitter = metrics.jitter_local,
                "acoustic analysis complete"
            );
            Ok(metrics)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PcmFormat;
    use std::f64::consts::PI;

    const SR: u32 = 16_000;

    fn tone(freq: f64, secs: f64, amp: f64) -> Vec<f32> {
        let n = (secs * f64::from(SR)) as usize;
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq * i as f64 / f64::from(SR)).sin()) as f32)
            .collect()
    }

    fn pulses_at(times: &[f64], amplitude: f64) -> Vec<Pulse> {
        times
            .iter()
            .map(|&time| Pulse {
                index: (time * f64::from(SR)) as usize,
                time,
                amplitude,
            })
            .collect()
    }

    #[test]
    fn tracks_steady_tone() {
        let frames = pitch_track(&tone(200.0, 1.0, 0.5), SR);
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.f0.is_some()));
        let (mean, std) = pitch_stats(&frames).unwrap();
        assert!((mean - 200.0).abs() < 1.0, "mean {mean}");
        assert!(std < 1.0, "std {std}");
    }

    #[test]
    fn steady_tone_is_clean() {
        let m = SignalAcousticAnalyzer::new().measure(&tone(200.0, 1.0, 0.5), SR);
        assert!((m.pitch_mean - 200.0).abs() < 1.0);
        assert!(m.jitter_local < 0.5, "jitter {}", m.jitter_local);
        assert!(m.shimmer_local < 1.0, "shimmer {}", m.shimmer_local);
        assert!(m.harmonics_to_noise_ratio > 30.0);
    }

    #[test]
    fn pure_tones_between_sample_periods_have_no_jitter() {
        for freq in [150.0, 220.0, 270.0, 310.0] {
            let m = SignalAcousticAnalyzer::new().measure(&tone(freq, 2.0, 0.5), SR);
            assert!((m.pitch_mean - freq).abs() < 1.0, "{freq} Hz: mean {}", m.pitch_mean);
            assert!(m.jitter_local < 0.1, "{freq} Hz: jitter {}", m.jitter_local);
            assert!(m.shimmer_local < 0.1, "{freq} Hz: shimmer {}", m.shimmer_local);
        }
    }

    #[test]
    fn pulse_times_fall_between_samples() {
        // 220 Hz: 72.7 samples per cycle
        let audio = tone(220.0, 0.5, 0.5);
        let frames = pitch_track(&audio, SR);
        let runs = place_pulses(&audio, SR, &frames);
        assert_eq!(runs.len(), 1);
        let period = 1.0 / 220.0;
        for w in runs[0].windows(2) {
            let dt = w[1].time - w[0].time;
            assert!((dt - period).abs() < 1e-6, "period {dt}");
            assert!((w[1].amplitude - 0.5).abs() < 1e-3, "amplitude {}", w[1].amplitude);
        }
    }

    #[test]
    fn no_pulses_are_placed_in_surrounding_silence() {
        let mut audio = vec![0.0f32; 4_000];
        audio.extend(tone(220.0, 0.5, 0.5));
        audio.extend(vec![0.0f32; 4_000]);
        let frames = pitch_track(&audio, SR);
        let runs = place_pulses(&audio, SR, &frames);
        assert!(!runs.is_empty());
        for p in runs.iter().flatten() {
            assert!((0.24..=0.76).contains(&p.time), "pulse at {} s", p.time);
            assert!(p.amplitude > 0.4, "pulse at {} s, amplitude {}", p.time, p.amplitude);
        }
        let m = SignalAcousticAnalyzer::new().measure(&audio, SR);
        assert!(m.jitter_local < 0.1, "jitter {}", m.jitter_local);
    }

    #[test]
    fn refine_peak_recovers_vertex() {
        // y = 1 - (x - 0.25)^2 sampled at -1, 0, 1
        let (offset, height) = refine_peak(1.0 - 1.5625, 1.0 - 0.0625, 1.0 - 0.5625);
        assert!((offset - 0.25).abs() < 1e-12);
        assert!((height - 1.0).abs() < 1e-12);
        assert_eq!(refine_peak(0.5, 0.5, 0.5), (0.0, 0.5));
    }

    #[test]
    fn pitch_spread_reflects_two_notes() {
        let mut audio = tone(150.0, 1.0, 0.5);
        audio.extend(tone(250.0, 1.0, 0.5));
        let m = SignalAcousticAnalyzer::new().measure(&audio, SR);
        assert!(m.pitch_mean > 180.0 && m.pitch_mean < 220.0, "mean {}", m.pitch_mean);
        assert!(m.pitch_std > 30.0, "std {}", m.pitch_std);
    }

    #[test]
    fn alternating_cycle_amplitude_shows_shimmer() {
        // 200 Hz carrier, every other cycle 0.55 or 0.45 peak
        let audio: Vec<f32> = (0..SR as usize)
            .map(|i| {
                let amp = if (i / 80) % 2 == 0 { 0.55 } else { 0.45 };
                (amp * (2.0 * PI * 200.0 * i as f64 / f64::from(SR)).sin()) as f32
            })
            .collect();
        let m = SignalAcousticAnalyzer::new().measure(&audio, SR);
        assert!((m.pitch_mean - 200.0).abs() < 2.0, "mean {}", m.pitch_mean);
        assert!(m.shimmer_local > 15.0 && m.shimmer_local < 25.0, "shimmer {}", m.shimmer_local);
    }

    #[test]
    fn silence_substitutes_zero_everywhere() {
        let m = SignalAcousticAnalyzer::new().measure(&vec![0.0; SR as usize], SR);
        assert_eq!(m, AudioMetrics::default());
    }

    #[test]
    fn too_short_input_is_not_an_error() {
        let m = SignalAcousticAnalyzer::new().measure(&[0.1, -0.1, 0.2], SR);
        assert_eq!(m, AudioMetrics::default());
    }

    #[test]
    fn jitter_from_alternating_periods() {
        let run = pulses_at(&[0.0, 0.005, 0.0105, 0.0155, 0.021], 0.5);
        let j = jitter_local(&[run]).unwrap();
        // mean |dT| 0.0005 over mean T 0.00525
        assert!((j - 9.5238).abs() < 1e-3, "jitter {j}");
    }

    #[test]
    fn jitter_skips_irregular_period_pairs() {
        let run = pulses_at(&[0.0, 0.005, 0.013], 0.5);
        assert_eq!(
            jitter_local(&[run]),
            Err(MeasurementError::TooFewPulses { needed: 3, found: 3 })
        );
    }

    #[test]
    fn shimmer_from_pulse_amplitudes() {
        let mut run = pulses_at(&[0.0, 0.005, 0.010, 0.015], 0.5);
        run[1].amplitude = 0.4;
        run[3].amplitude = 0.4;
        let s = shimmer_local(&[run]).unwrap();
        // mean |dA| 0.1 over mean A 0.45
        assert!((s - 22.2222).abs() < 1e-3, "shimmer {s}");
    }

    #[test]
    fn shimmer_needs_two_pulses() {
        assert!(shimmer_local(&[]).is_err());
        assert!(shimmer_local(&[pulses_at(&[0.0], 0.5)]).is_err());
    }

    #[tokio::test]
    async fn analyzer_rejects_multichannel_clip() {
        let clip = AudioClip::new(
            PcmFormat {
                channels: 2,
                ..PcmFormat::f32_mono(16_000)
            },
            vec![0.0; 320],
        );
        let err = SignalAcousticAnalyzer::new().analyze(&clip).await.unwrap_err();
        assert!(matches!(err, AcousticError::UnsupportedAudio(_)));
    }

    #[tokio::test]
    async fn analyzer_runs_on_clip() {
        let clip = AudioClip::new(PcmFormat::f32_mono(16_000), tone(180.0, 0.5, 0.4));
        let m = SignalAcousticAnalyzer::new().analyze(&clip).await.unwrap();
        assert!((m.pitch_mean - 180.0).abs() < 2.0, "mean {}", m.pitch_mean);
    }
}
