use anyhow::Context;
use bigkas_core::acoustics::SignalAcousticAnalyzer;
use bigkas_core::asr::{WhisperAsrBackend, WhisperConfig, AUTO_LANGUAGE};
use bigkas_core::config::{
    resolve_audio_limits, resolve_filler_lexicon, resolve_optional_string, resolve_parsed,
    resolve_string_with_default, AppConfig, Env, StdEnv, DEFAULT_WHISPER_MODEL,
    ENV_STORE_DIR, ENV_WHISPER_LANGUAGE, ENV_WHISPER_MODEL,
};
use bigkas_core::decode::FfmpegNormalizer;
use bigkas_core::pauses::{EnergyPauseDetector, PauseConfig, PauseMergePolicy};
use bigkas_core::pipeline::{AnalysisPipeline, PipelineConfig};
use bigkas_core::service::{content_type_for_path, AnalysisService, ErrorCategory, ServiceError};
use bigkas_core::store::{JsonFileStore, MemoryStore, ResultStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Parser, Debug)]
#[command(name = "bigkas")]
#[command(about = "Speaking-confidence analysis for recorded speech")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Whisper ggml model file.
    #[arg(long, global = true)]
    whisper_model: Option<String>,

    /// Spoken language code, or "auto" to detect.
    #[arg(long, global = true)]
    language: Option<String>,

    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Longest accepted recording in seconds; 0 disables the limit.
    #[arg(long, global = true)]
    max_audio_seconds: Option<f64>,

    /// Comma separated filler words and phrases.
    #[arg(long, global = true)]
    filler_words: Option<String>,

    /// Directory for saved results. Without it results live only in memory.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Count transcript gaps as pauses alongside silent stretches.
    #[arg(long, global = true)]
    union_pauses: bool,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one recording and print the result as JSON.
    Analyze {
        file: PathBuf,

        /// Defaults to a type derived from the file extension.
        #[arg(long)]
        content_type: Option<String>,

        #[arg(long)]
        session_id: Option<Uuid>,

        #[arg(long)]
        no_save: bool,

        #[arg(long)]
        pretty: bool,
    },
    /// Print a saved result.
    Show {
        session_id: Uuid,

        #[arg(long)]
        pretty: bool,
    },
    /// Report model and store status.
    Health {
        /// Load the transcription model first.
        #[arg(long)]
        load_model: bool,
    },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorCategory,
    detail: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;

    tracing::info!(
        model = %cfg.whisper.model_path.display(),
        language = %cfg.whisper.language,
        max_audio_seconds = ?cfg.limits.max_duration_secs,
        "config loaded"
    );

    match cfg.store_dir.clone() {
        Some(dir) => run(args.command, &cfg, JsonFileStore::new(dir)).await,
        None => run(args.command, &cfg, MemoryStore::new()).await,
    }
}

async fn run<S: ResultStore>(command: Command, cfg: &AppConfig, store: S) -> anyhow::Result<ExitCode> {
    let asr = WhisperAsrBackend::new(cfg.whisper.clone());
    let pipeline = AnalysisPipeline::new(
        FfmpegNormalizer::new(),
        asr,
        SignalAcousticAnalyzer::new(),
        EnergyPauseDetector::new(cfg.pauses),
        PipelineConfig::from_app(cfg),
    );
    let service = AnalysisService::new(pipeline, store, &cfg.limits);

    match command {
        Command::Analyze {
            file,
            content_type,
            session_id,
            no_save,
            pretty,
        } => {
            let audio = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let content_type = content_type
                .or_else(|| content_type_for_path(&file).map(str::to_owned))
                .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_owned());

            match service
                .analyze_bytes(audio.into(), &content_type, session_id, !no_save)
                .await
            {
                Ok(result) => print_json(&result, pretty),
                Err(e) => report(&e),
            }
        }
        Command::Show { session_id, pretty } => match service.lookup(session_id).await {
            Ok(result) => print_json(&result, pretty),
            Err(e) => report(&e),
        },
        Command::Health { load_model } => {
            if load_model {
                if let Err(e) = service.pipeline().asr.preload().await {
                    tracing::warn!(error = %e, "transcription model unavailable");
                }
            }
            print_json(&service.health().await, true)
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<ExitCode> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(ExitCode::SUCCESS)
}

fn exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Internal => 1,
        ErrorCategory::UnsupportedMedia => 3,
        ErrorCategory::TooLarge => 4,
        ErrorCategory::AnalysisFailed => 5,
        ErrorCategory::NotFound => 6,
    }
}

fn report(err: &ServiceError) -> anyhow::Result<ExitCode> {
    let category = err.category();
    let detail = err.to_string();
    tracing::error!(?category, error = %detail, "request failed");
    eprintln!(
        "{}",
        serde_json::to_string(&ErrorBody {
            error: category,
            detail: &detail,
        })?
    );
    Ok(ExitCode::from(exit_code(category)))
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: &Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let whisper = WhisperConfig {
        model_path: PathBuf::from(resolve_string_with_default(
            args.whisper_model.clone(),
            ENV_WHISPER_MODEL,
            env,
            DEFAULT_WHISPER_MODEL,
        )),
        language: resolve_string_with_default(
            args.language.clone(),
            ENV_WHISPER_LANGUAGE,
            env,
            AUTO_LANGUAGE,
        ),
        threads: args.threads,
    };

    let pauses = PauseConfig {
        merge_policy: if args.union_pauses {
            PauseMergePolicy::Union
        } else {
            PauseMergePolicy::EnergyPrimary
        },
        ..PauseConfig::default()
    };

    let store_dir = match &args.store_dir {
        Some(dir) => Some(dir.clone()),
        None => resolve_optional_string(None, ENV_STORE_DIR, env).map(PathBuf::from),
    };

    let cfg = AppConfig {
        whisper,
        limits: resolve_audio_limits(args.max_audio_seconds, env)?,
        fillers: resolve_filler_lexicon(args.filler_words.clone(), env)?,
        pauses,
        store_dir,
        ..AppConfig::default()
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigkas_core::config::{MapEnv, ENV_FILLER_WORDS, ENV_MAX_AUDIO_SECONDS};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn analyze_flags_parse() {
        let id = Uuid::new_v4().to_string();
        let args = parse(&[
            "bigkas",
            "analyze",
            "talk.mp3",
            "--session-id",
            &id,
            "--no-save",
            "--max-audio-seconds",
            "30",
        ]);
        match args.command {
            Command::Analyze {
                file,
                session_id,
                no_save,
                pretty,
                content_type,
            } => {
                assert_eq!(file, PathBuf::from("talk.mp3"));
                assert_eq!(session_id.map(|u| u.to_string()), Some(id));
                assert!(no_save);
                assert!(!pretty);
                assert!(content_type.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(args.max_audio_seconds, Some(30.0));
    }

    #[test]
    fn bad_session_id_is_rejected() {
        assert!(Args::try_parse_from(["bigkas", "show", "not-a-uuid"]).is_err());
    }

    #[test]
    fn config_resolves_cli_then_env_then_default() {
        let env = MapEnv::default()
            .with_var(ENV_WHISPER_MODEL, "/models/env.bin")
            .with_var(ENV_MAX_AUDIO_SECONDS, "90")
            .with_var(ENV_FILLER_WORDS, "um,uh")
            .with_var(ENV_STORE_DIR, "/var/lib/bigkas");
        let args = parse(&["bigkas", "--language", "en", "health"]);
        let cfg = build_config(&args, &env).unwrap();

        assert_eq!(cfg.whisper.model_path, PathBuf::from("/models/env.bin"));
        assert_eq!(cfg.whisper.language, "en");
        assert_eq!(cfg.limits.max_duration_secs, Some(90.0));
        assert_eq!(cfg.fillers.terms(), ["um", "uh"]);
        assert_eq!(cfg.store_dir, Some(PathBuf::from("/var/lib/bigkas")));
        assert_eq!(cfg.pauses.merge_policy, PauseMergePolicy::EnergyPrimary);
    }

    #[test]
    fn union_pauses_flag_switches_policy() {
        let args = parse(&["bigkas", "health", "--union-pauses"]);
        let cfg = build_config(&args, &MapEnv::default()).unwrap();
        assert_eq!(cfg.pauses.merge_policy, PauseMergePolicy::Union);
        assert_eq!(cfg.store_dir, None);
    }

    #[test]
    fn zero_threads_fail_validation() {
        let args = parse(&["bigkas", "--threads", "0", "health"]);
        assert!(build_config(&args, &MapEnv::default()).is_err());
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ErrorCategory::Internal,
            ErrorCategory::UnsupportedMedia,
            ErrorCategory::TooLarge,
            ErrorCategory::AnalysisFailed,
            ErrorCategory::NotFound,
        ]
        .map(exit_code);
        for (i, a) in codes.iter().enumerate() {
            assert!(codes[i + 1..].iter().all(|b| b != a));
        }
    }
}
