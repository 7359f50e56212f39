//! Speech rate and filler-word analysis over transcript text.

mod fillers;

use crate::scoring::round_to;
use serde::{Deserialize, Serialize};

pub use fillers::{detect_fillers, FillerAnalysis, FillerLexicon, DEFAULT_FILLER_WORDS};

const LOG_TARGET: &str = "fluency";
const RATE_DECIMALS: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FluencyMetrics {
    pub words_per_minute: f64,
    pub filler_count: usize,
    pub filler_words_found: Vec<String>,
    pub total_words: usize,
    pub articulation_rate: f64,
}

/// Number of whitespace-separated tokens.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().filter(|w| !w.is_empty()).count()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeakingRates {
    pub words_per_minute: f64,
    pub articulation_rate: f64,
}

/// Words per minute over the whole recording, and over speech time only.
///
/// The articulation rate falls back to the plain rate when no positive
/// speech duration is known.
pub fn speaking_rates(
    word_count: usize,
    duration_secs: f64,
    speech_duration_secs: Option<f64>,
) -> SpeakingRates {
    if duration_secs <= 0.0 {
        return SpeakingRates {
            words_per_minute: 0.0,
            articulation_rate: 0.0,
        };
    }

    let words = word_count as f64;
    let words_per_minute = words / duration_secs * 60.0;
    let articulation_rate = match speech_duration_secs {
        Some(speech) if speech > 0.0 => words / speech * 60.0,
        _ => words_per_minute,
    };

    SpeakingRates {
        words_per_minute,
        articulation_rate,
    }
}

pub fn analyze_fluency(
    text: &str,
    total_duration_secs: f64,
    speech_duration_secs: Option<f64>,
    lexicon: &FillerLexicon,
) -> FluencyMetrics {
    let total_words = count_words(text);
    let fillers = detect_fillers(text, lexicon);
    let rates = speaking_rates(total_words, total_duration_secs, speech_duration_secs);

    tracing::info!(
        target: LOG_TARGET,
        words = total_words,
        wpm = rates.words_per_minute,
        fillers = fillers.count,
        "fluency analysis complete"
    );

    FluencyMetrics {
        words_per_minute: round_to(rates.words_per_minute, RATE_DECIMALS),
        filler_count: fillers.count,
        filler_words_found: fillers.words_found,
        total_words,
        articulation_rate: round_to(rates.articulation_rate, RATE_DECIMALS),
    }
}
