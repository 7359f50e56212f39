use crate::decode::{AudioClip, DecodeError, PcmFormat, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_FRAMES: usize = 1024;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Band-limited sample rate conversion of a mono signal.
///
/// The output has `round(len * to / from)` samples and is aligned with the
/// input: the resampler's group delay is trimmed off the front.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(DecodeError::Resample(format!(
            "invalid rates {from_rate} Hz -> {to_rate} Hz"
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), CHUNK_FRAMES, 1)
        .map_err(|e| DecodeError::Resample(format!("init: {e}")))?;

    let delay = resampler.output_delay();
    let wanted = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(wanted + delay + CHUNK_FRAMES);
    let mut chunk = vec![0.0f32; CHUNK_FRAMES];
    let mut offset = 0;

    // Zero padding past the end flushes the filter tail.
    while output.len() < delay + wanted {
        chunk.fill(0.0);
        if offset < samples.len() {
            let end = (offset + CHUNK_FRAMES).min(samples.len());
            chunk[..end - offset].copy_from_slice(&samples[offset..end]);
        }
        offset += CHUNK_FRAMES;

        let produced = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(|e| DecodeError::Resample(format!("process: {e}")))?;
        match produced.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => return Err(DecodeError::Resample("resampler produced no output".to_owned())),
        }
    }

    output.drain(..delay);
    output.truncate(wanted);
    Ok(output)
}

impl AudioClip {
    /// Copy of the clip at `rate` Hz. Mono only; the source duration is kept.
    pub fn resampled(&self, rate: u32) -> Result<AudioClip> {
        if self.format.channels != 1 {
            return Err(DecodeError::Resample(format!(
                "expected mono audio, got {} channels",
                self.format.channels
            )));
        }
        if self.format.sample_rate == rate {
            return Ok(self.clone());
        }
        Ok(AudioClip {
            format: PcmFormat::f32_mono(rate),
            samples: resample(&self.samples, self.format.sample_rate, rate)?,
            duration_secs: self.duration_secs,
        })
    }
}
