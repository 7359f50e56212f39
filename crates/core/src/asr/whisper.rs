use crate::asr::{AsrBackend, AsrError, Transcript};
use crate::decode::AudioClip;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(feature = "whisper-rs")]
use crate::asr::{words_from_tokens, TranscriptSegment};
#[cfg(feature = "whisper-rs")]
use crate::util::SharedResource;
#[cfg(feature = "whisper-rs")]
use std::sync::{Arc, Once};
#[cfg(feature = "whisper-rs")]
use whisper_rs::{
    install_logging_hooks, FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
};

const LOG_TARGET: &str = "asr::whisper";

/// Language setting that lets the model detect the spoken language.
pub const AUTO_LANGUAGE: &str = "auto";

/// Input rate the model expects; clips at other rates are resampled first.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Each run creates its own `WhisperState`, so concurrent runs share the
/// context without locking.
#[cfg(feature = "whisper-rs")]
static MODEL: SharedResource<WhisperContext> = SharedResource::new();

#[cfg(feature = "whisper-rs")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    pub language: String,
    /// Inference threads; `None` leaves the engine default.
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: AUTO_LANGUAGE.to_owned(),
            threads: None,
        }
    }
}

impl WhisperConfig {
    fn model_key(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

#[derive(Clone, Debug)]
pub struct WhisperAsrBackend {
    config: WhisperConfig,
}

impl WhisperAsrBackend {
    pub fn new(config: WhisperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    /// Drop the process-wide model so the next run reloads it.
    pub fn unload() {
        #[cfg(feature = "whisper-rs")]
        MODEL.reset();
    }
}

#[cfg(feature = "whisper-rs")]
impl WhisperAsrBackend {
    /// Load the model ahead of the first transcription.
    pub async fn preload(&self) -> Result<(), AsrError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || load_context(&config).map(|_| ()))
            .await
            .map_err(|e| AsrError::ModelLoad(format!("model load task failed: {e}")))?
    }
}

#[cfg(not(feature = "whisper-rs"))]
impl WhisperAsrBackend {
    pub async fn preload(&self) -> Result<(), AsrError> {
        Err(unavailable())
    }
}

#[cfg(not(feature = "whisper-rs"))]
fn unavailable() -> AsrError {
    AsrError::EngineUnavailable("built without the whisper-rs feature".to_owned())
}

#[cfg(feature = "whisper-rs")]
fn load_context(config: &WhisperConfig) -> Result<Arc<WhisperContext>, AsrError> {
    LOGGING_HOOKS_INSTALLED.call_once(install_logging_hooks);

    MODEL.get_or_try_init(&config.model_key(), || {
        if !config.model_path.exists() {
            return Err(AsrError::ModelNotFound {
                path: config.model_key(),
            });
        }
        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| AsrError::ModelLoad("model path is not valid UTF-8".to_owned()))?;

        tracing::info!(target: LOG_TARGET, model = %path, "loading whisper model");
        WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| AsrError::ModelLoad(e.to_string()))
    })
}

#[cfg(feature = "whisper-rs")]
fn centis_to_secs(ts: i64) -> f64 {
    ts as f64 / 100.0
}

#[cfg(feature = "whisper-rs")]
fn run_inference(config: &WhisperConfig, samples: &[f32]) -> Result<Transcript, AsrError> {
    let context = load_context(config)?;
    let mut state = context
        .create_state()
        .map_err(|e| AsrError::Inference(format!("failed to create state: {e}")))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    if config.language == AUTO_LANGUAGE {
        params.set_language(None);
    } else {
        params.set_language(Some(&config.language));
    }
    if let Some(threads) = config.threads {
        params.set_n_threads(threads as i32);
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_token_timestamps(true);

    state
        .full(params, samples)
        .map_err(|e| AsrError::Inference(e.to_string()))?;

    let language = if config.language == AUTO_LANGUAGE {
        let lang_id = state.full_lang_id_from_state();
        whisper_rs::get_lang_str(lang_id).unwrap_or("").to_owned()
    } else {
        config.language.clone()
    };

    let mut text = String::new();
    let mut segments = Vec::new();
    for segment in state.as_iter() {
        let raw = segment.to_string();
        text.push_str(&raw);
        let mut tokens = Vec::new();
        for i in 0..segment.n_tokens() {
            let Some(token) = segment.get_token(i) else {
                continue;
            };
            let Ok(piece) = token.to_str_lossy() else {
                continue;
            };
            let data = token.token_data();
            tokens.push((piece.into_owned(), centis_to_secs(data.t0), centis_to_secs(data.t1)));
        }
        let words = words_from_tokens(&tokens);

        segments.push(TranscriptSegment {
            start: centis_to_secs(segment.start_timestamp()),
            end: centis_to_secs(segment.end_timestamp()),
            text: raw.trim().to_owned(),
            words: (!words.is_empty()).then_some(words),
        });
    }

    Ok(Transcript::new(text.trim(), segments, language))
}

impl AsrBackend for WhisperAsrBackend {
    fn transcribe<'a>(&'a self, audio: &'a AudioClip) -> BoxFuture<'a, Result<Transcript, AsrError>> {
        async move {
            if audio.format.sample_rate == 0 || audio.format.channels != 1 {
                return Err(AsrError::InvalidAudio(format!(
                    "expected mono audio with a sample rate, got {} Hz x{}",
                    audio.format.sample_rate, audio.format.channels
                )));
            }

            #[cfg(feature = "whisper-rs")]
            {
                let config = self.config.clone();
                let clip = audio.clone();
                let transcript = tokio::task::spawn_blocking(move || {
                    let input = clip
                        .resampled(WHISPER_SAMPLE_RATE)
                        .map_err(|e| AsrError::InvalidAudio(e.to_string()))?;
                    run_inference(&config, &input.samples)
                })
                .await
                .map_err(|e| AsrError::Inference(format!("inference task failed: {e}")))??;

                tracing::info!(
                    target: LOG_TARGET,
                    language = %transcript.language,
                    segments = transcript.segments.len(),
                    "transcription complete"
                );
                Ok(transcript)
            }

            #[cfg(not(feature = "whisper-rs"))]
            {
                Err(unavailable())
            }
        }
        .boxed()
    }

    fn is_loaded(&self) -> bool {
        #[cfg(feature = "whisper-rs")]
        {
            MODEL.get(&self.config.model_key()).is_some()
        }

        #[cfg(not(feature = "whisper-rs"))]
        {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{PcmFormat, PcmSampleType};

    #[test]
    fn default_config_detects_language() {
        let cfg = WhisperConfig::default();
        assert_eq!(cfg.language, AUTO_LANGUAGE);
        assert_eq!(cfg.threads, None);
    }

    #[test]
    fn model_is_not_loaded_until_first_use() {
        let backend = WhisperAsrBackend::new(WhisperConfig {
            model_path: PathBuf::from("/nonexistent/never-loaded.bin"),
            ..WhisperConfig::default()
        });
        assert!(!backend.is_loaded());
    }

    #[tokio::test]
    async fn rejects_multichannel_audio() {
        let backend = WhisperAsrBackend::new(WhisperConfig::default());
        let clip = AudioClip::new(
            PcmFormat {
                sample_rate: 44_100,
                channels: 2,
                sample_type: PcmSampleType::F32,
            },
            vec![0.0; 100],
        );
        let err = backend.transcribe(&clip).await.unwrap_err();
        assert!(matches!(err, AsrError::InvalidAudio(_)));
    }

    #[cfg(feature = "whisper-rs")]
    #[tokio::test]
    async fn native_rate_mono_reaches_the_model() {
        let backend = WhisperAsrBackend::new(WhisperConfig {
            model_path: PathBuf::from("/nonexistent/ggml-44k.bin"),
            ..WhisperConfig::default()
        });
        let clip = AudioClip::new(PcmFormat::f32_mono(44_100), vec![0.0; 4_410]);
        let err = backend.transcribe(&clip).await.unwrap_err();
        assert!(matches!(err, AsrError::ModelNotFound { .. }), "{err}");
    }

    #[cfg(feature = "whisper-rs")]
    #[test]
    fn context_is_shared_without_a_lock() {
        fn shareable<T: Send + Sync>() {}
        shareable::<WhisperContext>();
        shareable::<SharedResource<WhisperContext>>();
    }

    #[cfg(feature = "whisper-rs")]
    #[tokio::test]
    async fn missing_model_is_reported() {
        let backend = WhisperAsrBackend::new(WhisperConfig {
            model_path: PathBuf::from("/nonexistent/ggml-missing.bin"),
            ..WhisperConfig::default()
        });
        let err = backend.preload().await.unwrap_err();
        assert!(matches!(err, AsrError::ModelNotFound { .. }));
        assert!(!backend.is_loaded());
    }

    #[cfg(feature = "whisper-rs")]
    #[test]
    fn timestamps_are_centiseconds() {
        assert_eq!(centis_to_secs(150), 1.5);
        assert_eq!(centis_to_secs(0), 0.0);
    }
}
