mod whisper;

use crate::decode::AudioClip;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use whisper::{WhisperAsrBackend, WhisperConfig, AUTO_LANGUAGE, WHISPER_SAMPLE_RATE};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// One timed stretch of recognized speech, in seconds from the start.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub words: Option<Vec<WordTiming>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    /// End of the last segment, or 0 when nothing was recognized.
    pub duration: f64,
}

impl Transcript {
    pub fn new(
        text: impl Into<String>,
        segments: Vec<TranscriptSegment>,
        language: impl Into<String>,
    ) -> Self {
        let duration = segments.last().map_or(0.0, |s| s.end);
        Self {
            text: text.into(),
            segments,
            language: language.into(),
            duration,
        }
    }

    /// Word timings across all segments, in order. Empty when the engine did
    /// not report any.
    pub fn word_timestamps(&self) -> Vec<&WordTiming> {
        self.segments
            .iter()
            .filter_map(|s| s.words.as_deref())
            .flatten()
            .collect()
    }
}

fn is_control_token(piece: &str) -> bool {
    let p = piece.trim();
    (p.starts_with("[_") && p.ends_with(']')) || (p.starts_with("<|") && p.ends_with("|>"))
}

/// Join timed sub-word pieces into words. A piece that starts with
/// whitespace opens a new word, anything else extends the current one.
/// Engine control tokens such as `[_BEG_]` or `<|endoftext|>` are skipped.
pub fn words_from_tokens<S: AsRef<str>>(tokens: &[(S, f64, f64)]) -> Vec<WordTiming> {
    let mut words: Vec<WordTiming> = Vec::new();
    for (piece, start, end) in tokens {
        let piece = piece.as_ref();
        let text = piece.trim();
        if text.is_empty() || is_control_token(piece) {
            continue;
        }
        let opens_word = piece.starts_with(char::is_whitespace);
        match words.last_mut() {
            Some(word) if !opens_word => {
                word.word.push_str(text);
                word.end = *end;
            }
            _ => words.push(WordTiming {
                word: text.to_owned(),
                start: *start,
                end: *end,
            }),
        }
    }
    words
}

#[derive(thiserror::Error, Debug)]
pub enum AsrError {
    #[error("transcription engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("model not found: {path}")]
    ModelNotFound { path: String },

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unusable audio: {0}")]
    InvalidAudio(String),
}

pub trait AsrBackend: Send + Sync {
    fn transcribe<'a>(&'a self, audio: &'a AudioClip) -> BoxFuture<'a, Result<Transcript, AsrError>>;

    /// Whether the engine's model is resident and ready.
    fn is_loaded(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, words: Option<Vec<WordTiming>>) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: "x".to_owned(),
            words,
        }
    }

    #[test]
    fn duration_is_end_of_last_segment() {
        let t = Transcript::new("a b", vec![seg(0.0, 1.2, None), seg(1.5, 3.25, None)], "en");
        assert_eq!(t.duration, 3.25);
        assert_eq!(Transcript::new("", Vec::new(), "en").duration, 0.0);
    }

    #[test]
    fn word_timestamps_flatten_in_order() {
        let w = |word: &str, start: f64| WordTiming {
            word: word.to_owned(),
            start,
            end: start + 0.2,
        };
        let t = Transcript::new(
            "hello there friend",
            vec![
                seg(0.0, 1.0, Some(vec![w("hello", 0.1), w("there", 0.5)])),
                seg(1.0, 2.0, None),
                seg(2.0, 3.0, Some(vec![w("friend", 2.2)])),
            ],
            "en",
        );
        let words: Vec<&str> = t.word_timestamps().iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, ["hello", "there", "friend"]);
    }

    #[test]
    fn sub_word_pieces_join_into_words() {
        let tokens = [
            ("[_BEG_]", 0.0, 0.0),
            (" I", 0.0, 0.2),
            (" th", 0.3, 0.4),
            ("ink", 0.4, 0.6),
            (",", 0.6, 0.62),
            (" um", 0.9, 1.1),
            ("<|endoftext|>", 1.1, 1.1),
        ];
        let words = words_from_tokens(&tokens);
        let text: Vec<&str> = words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(text, ["I", "think,", "um"]);
        assert_eq!((words[1].start, words[1].end), (0.3, 0.62));
        assert_eq!((words[2].start, words[2].end), (0.9, 1.1));
    }

    #[test]
    fn leading_piece_without_space_still_starts_a_word() {
        let words = words_from_tokens(&[("hello".to_owned(), 0.5, 0.9)]);
        assert_eq!(
            words,
            [WordTiming {
                word: "hello".to_owned(),
                start: 0.5,
                end: 0.9,
            }]
        );
        assert!(words_from_tokens::<&str>(&[]).is_empty());
    }
}
