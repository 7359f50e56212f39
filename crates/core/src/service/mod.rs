//! Transport-neutral front door: media policy, spooling, persistence and
//! lookup around an [`AnalysisPipeline`].

use crate::acoustics::AcousticAnalyzer;
use crate::asr::AsrBackend;
use crate::config::AudioLimits;
use crate::decode::FormatNormalizer;
use crate::pauses::PauseDetector;
use crate::pipeline::{AnalysisPipeline, AnalysisResult, PipelineError};
use crate::store::{ResultStore, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LOG_TARGET: &str = "service";
const SPOOL_PREFIX: &str = "bigkas-upload-";

/// Broad failure classes a transport maps onto its own status codes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UnsupportedMedia,
    TooLarge,
    AnalysisFailed,
    NotFound,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("unsupported audio format: {content_type} (allowed: {})", .allowed.join(", "))]
    UnsupportedMediaType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("failed to spool upload: {0}")]
    Spool(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("analysis session {0} not found")]
    NotFound(Uuid),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedMediaType { .. } => ErrorCategory::UnsupportedMedia,
            Self::Pipeline(e) if e.is_input_rejection() => ErrorCategory::TooLarge,
            Self::Pipeline(_) => ErrorCategory::AnalysisFailed,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Spool(_) | Self::Store(_) => ErrorCategory::Internal,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub transcription_model_loaded: bool,
    pub store_connected: bool,
}

/// File suffix the spooled upload gets, so the normalizer can tell formats
/// apart.
pub fn suffix_for_content_type(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => ".mp3",
        _ => ".wav",
    }
}

/// Content type implied by a file extension, for callers that only have a
/// path.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        _ => None,
    }
}

fn spool(audio: &[u8], suffix: &str, dir: Option<&Path>) -> std::io::Result<tempfile::TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(SPOOL_PREFIX).suffix(suffix);
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(audio)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

pub struct AnalysisService<N, A, X, P, S> {
    pipeline: AnalysisPipeline<N, A, X, P>,
    store: S,
    allowed_content_types: Vec<String>,
    spool_dir: Option<PathBuf>,
}

impl<N, A, X, P, S> AnalysisService<N, A, X, P, S>
where
    N: FormatNormalizer,
    A: AsrBackend,
    X: AcousticAnalyzer,
    P: PauseDetector,
    S: ResultStore,
{
    pub fn new(pipeline: AnalysisPipeline<N, A, X, P>, store: S, limits: &AudioLimits) -> Self {
        Self {
            pipeline,
            store,
            allowed_content_types: limits
                .allowed_content_types
                .iter()
                .map(|c| c.trim().to_ascii_lowercase())
                .collect(),
            spool_dir: None,
        }
    }

    /// Spool uploads into `dir` instead of the system temp directory.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn pipeline(&self) -> &AnalysisPipeline<N, A, X, P> {
        &self.pipeline
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.trim().to_ascii_lowercase();
        self.allowed_content_types.iter().any(|a| *a == ct)
    }

    pub async fn analyze_bytes(
        &self,
        audio: Bytes,
        content_type: &str,
        session_id: Option<Uuid>,
        save: bool,
    ) -> Result<AnalysisResult, ServiceError> {
        if !self.is_allowed(content_type) {
            return Err(ServiceError::UnsupportedMediaType {
                content_type: content_type.to_owned(),
                allowed: self.allowed_content_types.clone(),
            });
        }

        let suffix = suffix_for_content_type(content_type);
        let spool_dir = self.spool_dir.clone();
        let bytes = audio.clone();
        let upload = tokio::task::spawn_blocking(move || spool(&bytes, suffix, spool_dir.as_deref()))
            .await
            .map_err(std::io::Error::other)??;
        tracing::info!(
            target: LOG_TARGET,
            bytes = audio.len(),
            content_type,
            "received audio"
        );

        let result = self.pipeline.analyze(&upload, session_id).await;
        if let Err(e) = upload.close() {
            tracing::warn!(target: LOG_TARGET, error = %e, "failed to clean up spooled upload");
        }
        let result = result?;

        if save {
            match self.store.save(&result).await {
                Ok(()) => tracing::info!(target: LOG_TARGET, session_id = %result.session_id, "result saved"),
                Err(e) => tracing::error!(
                    target: LOG_TARGET,
                    session_id = %result.session_id,
                    error = %e,
                    "failed to save result"
                ),
            }
        }

        Ok(result)
    }

    pub async fn lookup(&self, session_id: Uuid) -> Result<AnalysisResult, ServiceError> {
        self.store
            .get(session_id)
            .await?
            .ok_or(ServiceError::NotFound(session_id))
    }

    pub async fn health(&self) -> HealthReport {
        let store_connected = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "store ping failed");
                false
            }
        };
        HealthReport {
            status: "healthy".to_owned(),
            timestamp: Utc::now(),
            transcription_model_loaded: self.pipeline.asr.is_loaded(),
            store_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustics::{AcousticError, AudioMetrics, SignalAcousticAnalyzer};
    use crate::asr::{AsrError, Transcript, TranscriptSegment};
    use crate::decode::{AudioClip, FfmpegNormalizer};
    use crate::pauses::EnergyPauseDetector;
    use crate::pipeline::PipelineConfig;
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::io::Cursor;

    #[derive(Clone)]
    struct StubAsr;

    impl AsrBackend for StubAsr {
        fn transcribe<'a>(&'a self, audio: &'a AudioClip) -> BoxFuture<'a, Result<Transcript, AsrError>> {
            async move {
                let seg = TranscriptSegment {
                    start: 0.0,
                    end: audio.duration_secs,
                    text: "well um this went fine".to_owned(),
                    words: None,
                };
                Ok(Transcript::new("well um this went fine", vec![seg], "en"))
            }
            .boxed()
        }

        fn is_loaded(&self) -> bool {
            false
        }
    }

    #[derive(Clone)]
    struct FailingStore;

    impl ResultStore for FailingStore {
        fn save<'a>(&'a self, _result: &'a AnalysisResult) -> BoxFuture<'a, Result<(), StoreError>> {
            async move { Err(StoreError::Unavailable("offline".to_owned())) }.boxed()
        }

        fn get(&self, _id: Uuid) -> BoxFuture<'_, Result<Option<AnalysisResult>, StoreError>> {
            async move { Err(StoreError::Unavailable("offline".to_owned())) }.boxed()
        }

        fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
            async move { Err(StoreError::Unavailable("offline".to_owned())) }.boxed()
        }
    }

    #[derive(Clone)]
    struct NeverCalledAcoustics;

    impl AcousticAnalyzer for NeverCalledAcoustics {
        fn analyze<'a>(&'a self, _audio: &'a AudioClip) -> BoxFuture<'a, Result<AudioMetrics, AcousticError>> {
            async move { Err(AcousticError::Task("should not run".to_owned())) }.boxed()
        }
    }

    fn wav_bytes(secs: f64) -> Bytes {
        let mut buf = Vec::new();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut w = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
            for i in 0..(secs * 16_000.0) as usize {
                let t = i as f64 / 16_000.0;
                w.write_sample((6_000.0 * (2.0 * std::f64::consts::PI * 180.0 * t).sin()) as i16)
                    .unwrap();
            }
            w.finalize().unwrap();
        }
        Bytes::from(buf)
    }

    fn service<X: AcousticAnalyzer, S: ResultStore>(
        acoustics: X,
        store: S,
        max_duration_secs: Option<f64>,
    ) -> AnalysisService<FfmpegNormalizer, StubAsr, X, EnergyPauseDetector, S> {
        let limits = AudioLimits {
            max_duration_secs,
            ..AudioLimits::default()
        };
        let pipeline = AnalysisPipeline::new(
            FfmpegNormalizer::new(),
            StubAsr,
            acoustics,
            EnergyPauseDetector::default(),
            PipelineConfig {
                max_duration_secs,
                ..PipelineConfig::default()
            },
        );
        AnalysisService::new(pipeline, store, &limits)
    }

    #[test]
    fn content_type_suffixes() {
        assert_eq!(suffix_for_content_type("audio/mpeg"), ".mp3");
        assert_eq!(suffix_for_content_type("Audio/MP3"), ".mp3");
        assert_eq!(suffix_for_content_type("audio/x-wav"), ".wav");
        assert_eq!(content_type_for_path(Path::new("a.MP3")), Some("audio/mpeg"));
        assert_eq!(content_type_for_path(Path::new("a.flac")), None);
    }

    #[test]
    fn spool_writes_upload_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = spool(b"ID3 bytes", ".mp3", Some(dir.path())).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(SPOOL_PREFIX) && name.ends_with(".mp3"), "{name}");
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3 bytes");

        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[tokio::test]
    async fn rejects_unsupported_media_before_analysis() {
        let svc = service(NeverCalledAcoustics, MemoryStore::new(), None);
        let err = svc
            .analyze_bytes(Bytes::from_static(b"OggS"), "audio/ogg", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::UnsupportedMedia);
    }

    #[tokio::test]
    async fn analyzes_saves_and_looks_up() {
        let spool = tempfile::tempdir().unwrap();
        let svc = service(SignalAcousticAnalyzer::new(), MemoryStore::new(), Some(600.0))
            .with_spool_dir(spool.path());

        let result = svc
            .analyze_bytes(wav_bytes(1.0), "audio/wav", None, true)
            .await
            .unwrap();
        assert_eq!(result.audio_duration, 1.0);
        assert_eq!(result.fluency_metrics.total_words, 5);
        assert_eq!(result.fluency_metrics.filler_count, 1);
        assert!((result.audio_metrics.pitch_mean - 180.0).abs() < 2.0);

        assert_eq!(svc.lookup(result.session_id).await.unwrap(), result);
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn skips_persistence_when_not_requested() {
        let svc = service(SignalAcousticAnalyzer::new(), MemoryStore::new(), None);
        let result = svc
            .analyze_bytes(wav_bytes(0.5), "audio/x-wav", None, false)
            .await
            .unwrap();
        assert!(svc.store().is_empty().await);
        let err = svc.lookup(result.session_id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn persistence_failure_is_not_fatal() {
        let svc = service(SignalAcousticAnalyzer::new(), FailingStore, None);
        let id = Uuid::new_v4();
        let result = svc
            .analyze_bytes(wav_bytes(0.5), "audio/wav", Some(id), true)
            .await
            .unwrap();
        assert_eq!(result.session_id, id);

        let err = svc.lookup(id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[tokio::test]
    async fn over_long_upload_is_too_large_and_cleaned_up() {
        let spool = tempfile::tempdir().unwrap();
        let svc = service(NeverCalledAcoustics, MemoryStore::new(), Some(0.25))
            .with_spool_dir(spool.path());
        let err = svc
            .analyze_bytes(wav_bytes(0.5), "audio/wav", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TooLarge);
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stage_failure_is_analysis_failed() {
        let svc = service(NeverCalledAcoustics, MemoryStore::new(), None);
        let err = svc
            .analyze_bytes(wav_bytes(0.5), "audio/wav", None, true)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::AnalysisFailed);
    }

    #[tokio::test]
    async fn health_reports_store_and_model() {
        let svc = service(SignalAcousticAnalyzer::new(), MemoryStore::new(), None);
        let report = svc.health().await;
        assert_eq!(report.status, "healthy");
        assert!(report.store_connected);
        assert!(!report.transcription_model_loaded);

        let down = service(SignalAcousticAnalyzer::new(), FailingStore, None);
        assert!(!down.health().await.store_connected);
    }
}
