use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FILLER_WORDS: &[&str] = &[
    "um", "uh", "ah", "like", "you know", "er", "hmm", "so", "actually", "basically",
];

/// Configurable set of hesitation and discourse markers.
///
/// Terms are stored lowercased. A term containing a space is matched as a
/// phrase against the whole text, anything else token by token. Phrase
/// patterns are compiled once, when the lexicon is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "LexiconTerms", into = "LexiconTerms")]
pub struct FillerLexicon {
    terms: Vec<String>,
    phrases: Vec<(String, Regex)>,
}

#[derive(Serialize, Deserialize)]
struct LexiconTerms {
    terms: Vec<String>,
}

impl From<LexiconTerms> for FillerLexicon {
    fn from(raw: LexiconTerms) -> Self {
        Self::new(raw.terms)
    }
}

impl From<FillerLexicon> for LexiconTerms {
    fn from(lexicon: FillerLexicon) -> Self {
        Self {
            terms: lexicon.terms,
        }
    }
}

fn phrase_regex(phrase: &str) -> Option<Regex> {
    let pattern = format!(r"\b{}\b", regex::escape(phrase));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(target: "fluency", phrase, error = %e, "skipping unmatchable filler phrase");
            None
        }
    }
}

impl FillerLexicon {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for term in terms {
            let t = term.as_ref().trim().to_lowercase();
            if !t.is_empty() && !out.contains(&t) {
                out.push(t);
            }
        }
        let phrases = out
            .iter()
            .filter(|t| t.contains(' '))
            .filter_map(|t| phrase_regex(t).map(|re| (t.to_string(), re)))
            .collect();
        Self {
            terms: out,
            phrases,
        }
    }

    /// Parse a comma separated list, e.g. from an environment variable.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn is_single_word(&self, token: &str) -> bool {
        self.terms.iter().any(|t| !t.contains(' ') && t == token)
    }
}

impl PartialEq for FillerLexicon {
    fn eq(&self, other: &Self) -> bool {
        self.terms == other.terms
    }
}

impl Eq for FillerLexicon {}

impl Default for FillerLexicon {
    fn default() -> Self {
        Self::new(DEFAULT_FILLER_WORDS.iter().copied())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FillerAnalysis {
    pub count: usize,
    /// Single-word hits in scan order, then phrase hits grouped by term.
    pub words_found: Vec<String>,
    /// Ascending. Token index for single words, count of preceding spaces
    /// for phrases; the two are only roughly comparable.
    pub positions: Vec<usize>,
}

fn strip_punctuation(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

pub fn detect_fillers(text: &str, lexicon: &FillerLexicon) -> FillerAnalysis {
    let lower = text.to_lowercase();

    let mut words_found = Vec::new();
    let mut positions = Vec::new();

    for (index, token) in lower.split_whitespace().enumerate() {
        let clean = strip_punctuation(token);
        if lexicon.is_single_word(&clean) {
            words_found.push(clean);
            positions.push(index);
        }
    }

    for (phrase, re) in &lexicon.phrases {
        for m in re.find_iter(&lower) {
            words_found.push(phrase.clone());
            positions.push(lower[..m.start()].matches(' ').count());
        }
    }

    positions.sort_unstable();

    FillerAnalysis {
        count: words_found.len(),
        words_found,
        positions,
    }
}
