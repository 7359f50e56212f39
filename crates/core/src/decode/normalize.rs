use crate::decode::{load_wav, AudioClip, DecodeError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const LOG_TARGET: &str = "decode::normalize";
const TEMP_PREFIX: &str = "bigkas-";
const NORMALIZED_EXTENSION: &str = "wav";

/// Whether `path` is already in the container every stage reads.
pub fn is_normalized_container(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(NORMALIZED_EXTENSION))
}

/// Normalized recording handle.
///
/// Either borrows the caller's file or owns a converted temporary copy. The
/// copy is removed when the handle is dropped, whichever way the run ends.
#[derive(Debug)]
pub struct NormalizedAudio {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl NormalizedAudio {
    pub fn original(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    pub fn converted(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Decode to mono at the recording's own rate, off the async workers.
    pub async fn load(&self) -> Result<AudioClip> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_wav(&path))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))?
    }
}

impl Drop for NormalizedAudio {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            match temp.close() {
                Ok(()) => tracing::debug!(target: LOG_TARGET, path = %self.path.display(), "temporary wav removed"),
                Err(e) => tracing::warn!(
                    target: LOG_TARGET,
                    path = %self.path.display(),
                    error = %e,
                    "failed to clean up temporary wav"
                ),
            }
        }
    }
}

pub trait FormatNormalizer: Send + Sync {
    fn normalize<'a>(&'a self, input: &'a Path) -> BoxFuture<'a, Result<NormalizedAudio>>;
}

/// Passes WAV through untouched and converts everything else with ffmpeg.
#[derive(Clone, Debug, Default)]
pub struct FfmpegNormalizer {
    temp_dir: Option<PathBuf>,
}

impl FfmpegNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place converted files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: Some(dir.into()),
        }
    }

    fn temp_wav(&self) -> Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(".wav");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }

    #[cfg(feature = "ffmpeg-sidecar")]
    fn ensure_ffmpeg_available(&self) -> Result<()> {
        ffmpeg_sidecar::download::auto_download()
            .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))
    }

    #[cfg(feature = "ffmpeg-sidecar")]
    async fn convert(&self, input: &Path) -> Result<NormalizedAudio> {
        self.ensure_ffmpeg_available()?;
        let out = NormalizedAudio::converted(self.temp_wav()?);

        let output = tokio::process::Command::new(ffmpeg_sidecar::paths::ffmpeg_path())
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-sn", "-dn", "-ac", "1"])
            .args(["-acodec", "pcm_s16le", "-f", "wav"])
            .arg(out.path())
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| DecodeError::FfmpegFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr_s = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DecodeError::FfmpegFailed(format!(
                "exit_code={:?} stderr={stderr_s}",
                output.status.code()
            )));
        }

        Ok(out)
    }

    #[cfg(not(feature = "ffmpeg-sidecar"))]
    async fn convert(&self, input: &Path) -> Result<NormalizedAudio> {
        Err(DecodeError::FfmpegUnavailable(format!(
            "cannot convert {}: built without the ffmpeg-sidecar feature",
            input.display()
        )))
    }
}

impl FormatNormalizer for FfmpegNormalizer {
    fn normalize<'a>(&'a self, input: &'a Path) -> BoxFuture<'a, Result<NormalizedAudio>> {
        async move {
            if is_normalized_container(input) {
                return Ok(NormalizedAudio::original(input));
            }
            tracing::info!(target: LOG_TARGET, input = %input.display(), "converting to wav");
            self.convert(input).await
        }
        .boxed()
    }
}
