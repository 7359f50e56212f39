use crate::asr::WhisperConfig;
use crate::fluency::FillerLexicon;
use crate::pauses::PauseConfig;
use crate::scoring::{ScoringProfile, ScoringWeights};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_WHISPER_MODEL: &str = "models/ggml-base.bin";
pub const DEFAULT_MAX_AUDIO_SECS: f64 = 600.0;
pub const DEFAULT_ALLOWED_CONTENT_TYPES: [&str; 4] =
    ["audio/wav", "audio/x-wav", "audio/mpeg", "audio/mp3"];

pub const ENV_WHISPER_MODEL: &str = "BIGKAS_WHISPER_MODEL";
pub const ENV_WHISPER_LANGUAGE: &str = "BIGKAS_WHISPER_LANGUAGE";
pub const ENV_MAX_AUDIO_SECONDS: &str = "BIGKAS_MAX_AUDIO_SECONDS";
pub const ENV_FILLER_WORDS: &str = "BIGKAS_FILLER_WORDS";
pub const ENV_STORE_DIR: &str = "BIGKAS_STORE_DIR";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioLimits {
    /// Seconds; `None` disables the check.
    pub max_duration_secs: Option<f64>,
    pub allowed_content_types: Vec<String>,
}

impl AudioLimits {
    pub fn new(max_duration_secs: Option<f64>) -> Result<Self, ConfigError> {
        if let Some(max) = max_duration_secs {
            if !max.is_finite() || max <= 0.0 {
                return Err(ConfigError::InvalidMaxDuration(max.to_string()));
            }
        }
        Ok(Self {
            max_duration_secs,
            ..Self::default()
        })
    }
}

impl Default for AudioLimits {
    fn default() -> Self {
        Self {
            max_duration_secs: Some(DEFAULT_MAX_AUDIO_SECS),
            allowed_content_types: DEFAULT_ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub whisper: WhisperConfig,
    pub limits: AudioLimits,
    pub fillers: FillerLexicon,
    pub pauses: PauseConfig,
    pub weights: ScoringWeights,
    pub profile: ScoringProfile,
    /// Where results are persisted; `None` keeps them in memory.
    pub store_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.whisper.language.trim().is_empty() {
            return Err(ConfigError::EmptyLanguage);
        }
        if self.whisper.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if self.fillers.is_empty() {
            return Err(ConfigError::EmptyFillerList);
        }
        if !(self.pauses.min_pause_secs > 0.0) {
            return Err(ConfigError::InvalidMinPause(self.pauses.min_pause_secs));
        }
        let total = self.weights.total();
        if !((total - 1.0).abs() < 1e-6) {
            return Err(ConfigError::WeightsNotNormalized(total));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("whisper language must not be empty (use \"auto\" to detect)")]
    EmptyLanguage,
    #[error("thread count must be > 0")]
    ZeroThreads,
    #[error("filler word list must not be empty")]
    EmptyFillerList,
    #[error("max audio duration must be a positive number of seconds, got {0}")]
    InvalidMaxDuration(String),
    #[error("minimum pause must be > 0 s, got {0}")]
    InvalidMinPause(f64),
    #[error("scoring weights must sum to 1.0, got {0}")]
    WeightsNotNormalized(f64),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// CLI value, else the parsed environment variable, else `None`. An
/// unparsable environment value is an error rather than silently ignored.
pub fn resolve_parsed<T: FromStr>(
    cli_value: Option<T>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<T>, ConfigError> {
    if cli_value.is_some() {
        return Ok(cli_value);
    }
    match env.var(env_key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: env_key.to_owned(),
                value: raw,
            }),
        None => Ok(None),
    }
}

/// Filler lexicon from a comma separated list, falling back to the built-in
/// English set.
pub fn resolve_filler_lexicon(
    cli_value: Option<String>,
    env: &impl Env,
) -> Result<FillerLexicon, ConfigError> {
    match resolve_optional_string(cli_value, ENV_FILLER_WORDS, env) {
        Some(list) => {
            let lexicon = FillerLexicon::parse_list(&list);
            if lexicon.is_empty() {
                return Err(ConfigError::EmptyFillerList);
            }
            Ok(lexicon)
        }
        None => Ok(FillerLexicon::default()),
    }
}

/// `0` disables the duration limit.
pub fn resolve_audio_limits(
    cli_value: Option<f64>,
    env: &impl Env,
) -> Result<AudioLimits, ConfigError> {
    match resolve_parsed(cli_value, ENV_MAX_AUDIO_SECONDS, env)? {
        Some(secs) if secs == 0.0 => AudioLimits::new(None),
        Some(secs) => AudioLimits::new(Some(secs)),
        None => Ok(AudioLimits::default()),
    }
}
