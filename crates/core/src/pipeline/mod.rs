//! One recording in, one [`AnalysisResult`] out.
//!
//! Stages run strictly in order: normalize, decode and check duration,
//! transcribe, measure acoustics, detect pauses, fluency, score. The first
//! stage-fatal error ends the run; the normalized temporary copy (if one was
//! made) is released on every exit path when its handle drops.

use crate::acoustics::{AcousticAnalyzer, AcousticError, AudioMetrics};
use crate::asr::{AsrBackend, AsrError};
use crate::config::AppConfig;
use crate::decode::{DecodeError, FormatNormalizer};
use crate::fluency::{analyze_fluency, FillerLexicon, FluencyMetrics};
use crate::pauses::{analyze_pauses, speech_duration, PauseDetector, PauseError, PauseMetrics};
use crate::scoring::{round_to, ConfidenceScore, ConfidenceScorer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

const LOG_TARGET: &str = "pipeline";
const DURATION_DECIMALS: u32 = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub session_id: Uuid,
    pub transcription: String,
    pub language: String,
    /// Seconds.
    pub audio_duration: f64,
    pub audio_metrics: AudioMetrics,
    pub fluency_metrics: FluencyMetrics,
    pub pause_metrics: PauseMetrics,
    pub confidence_score: ConfidenceScore,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("audio is {duration_secs:.1}s long, the limit is {max_secs:.1}s")]
    DurationExceeded { duration_secs: f64, max_secs: f64 },

    #[error("format normalization failed: {0}")]
    Normalize(DecodeError),

    #[error("failed to decode normalized audio: {0}")]
    Decode(DecodeError),

    #[error("transcription failed: {0}")]
    Transcription(#[from] AsrError),

    #[error("acoustic analysis failed: {0}")]
    Acoustics(#[from] AcousticError),

    #[error("pause detection failed: {0}")]
    Pauses(#[from] PauseError),
}

impl PipelineError {
    /// Whether the input itself was rejected, as opposed to a stage failing.
    pub fn is_input_rejection(&self) -> bool {
        matches!(self, Self::DurationExceeded { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineConfig {
    pub lexicon: FillerLexicon,
    pub scorer: ConfidenceScorer,
    /// Seconds; `None` accepts any length.
    pub max_duration_secs: Option<f64>,
}

impl PipelineConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            lexicon: app.fillers.clone(),
            scorer: ConfidenceScorer::new(app.weights, app.profile),
            max_duration_secs: app.limits.max_duration_secs,
        }
    }
}

pub struct AnalysisPipeline<N, A, X, P> {
    pub normalizer: N,
    pub asr: A,
    pub acoustics: X,
    pub pauses: P,
    pub config: PipelineConfig,
}

impl<N, A, X, P> AnalysisPipeline<N, A, X, P>
where
    N: FormatNormalizer,
    A: AsrBackend,
    X: AcousticAnalyzer,
    P: PauseDetector,
{
    pub fn new(normalizer: N, asr: A, acoustics: X, pauses: P, config: PipelineConfig) -> Self {
        Self {
            normalizer,
            asr,
            acoustics,
            pauses,
            config,
        }
    }

    pub async fn analyze(
        &self,
        input: &Path,
        session_id: Option<Uuid>,
    ) -> Result<AnalysisResult, PipelineError> {
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        tracing::info!(target: LOG_TARGET, %session_id, input = %input.display(), "analysis started");

        let normalized = self
            .normalizer
            .normalize(input)
            .await
            .map_err(PipelineError::Normalize)?;
        let clip = normalized.load().await.map_err(PipelineError::Decode)?;
        let duration = clip.duration_secs;
        tracing::info!(
            target: LOG_TARGET,
            %session_id,
            duration_secs = duration,
            converted = normalized.is_temporary(),
            "audio ready"
        );

        if let Some(max_secs) = self.config.max_duration_secs {
            if duration > max_secs {
                return Err(PipelineError::DurationExceeded {
                    duration_secs: duration,
                    max_secs,
                });
            }
        }

        let transcript = self.asr.transcribe(&clip).await?;
        tracing::info!(
            target: LOG_TARGET,
            %session_id,
            segments = transcript.segments.len(),
            language = %transcript.language,
            "transcribed"
        );

        let audio_metrics = self.acoustics.analyze(&clip).await?;
        tracing::info!(target: LOG_TARGET, %session_id, "acoustics measured");

        let energy_pauses = self.pauses.detect(&clip).await?;
        let pause_metrics = analyze_pauses(
            energy_pauses,
            &transcript.segments,
            duration,
            self.pauses.config(),
        );
        tracing::info!(target: LOG_TARGET, %session_id, pauses = pause_metrics.pause_count, "pauses detected");

        let speech_secs = speech_duration(duration, &pause_metrics);
        let fluency_metrics = analyze_fluency(
            &transcript.text,
            duration,
            Some(speech_secs),
            &self.config.lexicon,
        );

        let confidence_score =
            self.config
                .scorer
                .score(&audio_metrics, &fluency_metrics, &pause_metrics);
        tracing::info!(
            target: LOG_TARGET,
            %session_id,
            overall = confidence_score.overall_score,
            "analysis complete"
        );

        Ok(AnalysisResult {
            session_id,
            transcription: transcript.text,
            language: transcript.language,
            audio_duration: round_to(duration, DURATION_DECIMALS),
            audio_metrics,
            fluency_metrics,
            pause_metrics,
            confidence_score,
            analyzed_at: Utc::now(),
        })
    }
}
