use crate::decode::{
    downmix_to_mono, duration_from_sample_count, AudioClip, DecodeError, PcmFormat, Result,
};
use std::path::Path;

fn read_interleaved<R: std::io::Read>(reader: &mut hound::WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DecodeError::InvalidWav(format!("failed to read samples: {e}"))),
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DecodeError::InvalidWav(format!(
                    "unsupported bit depth {}",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (f64::from(v) * scale) as f32))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DecodeError::InvalidWav(format!("failed to read samples: {e}")))
        }
    }
}

/// Decode a WAV file into a mono clip at the file's own sample rate.
pub fn load_wav(path: &Path) -> Result<AudioClip> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| DecodeError::InvalidWav(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(DecodeError::InvalidWav(format!(
            "{}: channels={} sample_rate={}",
            path.display(),
            spec.channels,
            spec.sample_rate
        )));
    }

    let interleaved = read_interleaved(&mut reader)?;
    let duration_secs = duration_from_sample_count(spec.sample_rate, spec.channels, interleaved.len());
    let samples = downmix_to_mono(&interleaved, spec.channels);

    tracing::debug!(
        target: "decode",
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        duration_secs,
        "wav decoded"
    );

    Ok(AudioClip {
        format: PcmFormat::f32_mono(spec.sample_rate),
        samples,
        duration_secs,
    })
}
