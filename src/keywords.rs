//! Keyword extraction: corpus TF-IDF and RAKE phrase scoring.
//!
//! The [`TfIdfModel`] is owned by a single sync invocation and has a
//! two-phase lifecycle: documents are added during phase 1, [`build`]
//! derives document frequencies exactly once, and phase 2 reads scores.
//! Reading before building (or after a post-build addition) is a
//! programmer error surfaced as [`TfIdfError::NotBuilt`].

use std::collections::{HashMap, HashSet};

use crate::tokenize::is_stop_word;

/// Scoring queried before the model was built.
#[derive(Debug, PartialEq, Eq)]
pub enum TfIdfError {
    NotBuilt,
}

impl std::fmt::Display for TfIdfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TfIdfError::NotBuilt => write!(f, "TF-IDF model queried before build()"),
        }
    }
}

impl std::error::Error for TfIdfError {}

/// Corpus-wide TF-IDF model.
///
/// TF is the raw in-document count, IDF is `ln(N / df)`, and the score is
/// their product. Adding a document invalidates any previous build.
#[derive(Debug, Default)]
pub struct TfIdfModel {
    docs: HashMap<String, HashMap<String, usize>>,
    df: HashMap<String, usize>,
    built: bool,
}

impl TfIdfModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Add a document's term frequencies. Resets the built flag.
    pub fn add_document(&mut self, id: &str, text: &str) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for term in tokenize_terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        self.docs.insert(id.to_string(), counts);
        self.built = false;
    }

    /// Recompute document frequencies over the current documents.
    pub fn build(&mut self) {
        self.df.clear();
        for counts in self.docs.values() {
            for term in counts.keys() {
                *self.df.entry(term.clone()).or_insert(0) += 1;
            }
        }
        self.built = true;
    }

    /// TF·IDF score of `term` within document `id`.
    pub fn tf_idf(&self, id: &str, term: &str) -> Result<f64, TfIdfError> {
        if !self.built {
            return Err(TfIdfError::NotBuilt);
        }
        let tf = self
            .docs
            .get(id)
            .and_then(|counts| counts.get(term))
            .copied()
            .unwrap_or(0) as f64;
        if tf == 0.0 {
            return Ok(0.0);
        }
        Ok(tf * self.idf(term))
    }

    /// The `n` highest-scoring terms for document `id`, excluding terms
    /// shorter than 3 characters and purely numeric terms.
    pub fn top_terms(&self, id: &str, n: usize) -> Result<Vec<(String, f64)>, TfIdfError> {
        if !self.built {
            return Err(TfIdfError::NotBuilt);
        }
        let counts = match self.docs.get(id) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<(String, f64)> = counts
            .iter()
            .filter(|(term, _)| term.len() >= 3 && !term.chars().all(|c| c.is_ascii_digit()))
            .map(|(term, &tf)| (term.clone(), tf as f64 * self.idf(term)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(n);
        Ok(scored)
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self.df.get(term).copied().unwrap_or(0);
        if df == 0 {
            return 0.0;
        }
        (self.docs.len() as f64 / df as f64).ln()
    }
}

/// Lowercased alphanumeric word sequences of length >= 2, stop-words removed.
fn tokenize_terms(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut terms = Vec::new();
    let mut current = String::new();
    for ch in lower.chars() {
        if ch.is_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            push_term(&mut terms, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_term(&mut terms, current);
    }
    terms
}

fn push_term(terms: &mut Vec<String>, term: String) {
    if term.len() >= 2 && !is_stop_word(&term) {
        terms.push(term);
    }
}

// ============ RAKE ============

/// Phrase-score threshold below which RAKE candidates are discarded.
pub const RAKE_SCORE_THRESHOLD: f64 = 2.0;

/// Rapid Automatic Keyword Extraction.
///
/// Candidate phrases are maximal runs of content words bounded by
/// stop-words and sentence punctuation. Each word scores degree/frequency,
/// each phrase the sum of its word scores; phrases under
/// [`RAKE_SCORE_THRESHOLD`] are dropped and the top `top_n` are returned.
pub fn rake_keywords(text: &str, top_n: usize) -> Vec<(String, f64)> {
    let phrases = candidate_phrases(text);
    if phrases.is_empty() {
        return Vec::new();
    }

    let mut freq: HashMap<&str, f64> = HashMap::new();
    let mut degree: HashMap<&str, f64> = HashMap::new();
    for phrase in &phrases {
        for word in phrase {
            *freq.entry(word).or_insert(0.0) += 1.0;
            *degree.entry(word).or_insert(0.0) += phrase.len() as f64;
        }
    }

    let mut scored: HashMap<String, f64> = HashMap::new();
    for phrase in &phrases {
        let score: f64 = phrase.iter().map(|w| degree[w.as_str()] / freq[w.as_str()]).sum();
        let key = phrase.join(" ");
        // The same phrase text always scores the same; keep one entry.
        scored.entry(key).or_insert(score);
    }

    let mut ranked: Vec<(String, f64)> = scored
        .into_iter()
        .filter(|(_, score)| *score >= RAKE_SCORE_THRESHOLD)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(top_n);
    ranked
}

/// Split normalized text into candidate phrases: runs of content words
/// delimited by stop-words, short words, and sentence punctuation.
fn candidate_phrases(text: &str) -> Vec<Vec<String>> {
    let lower = text.to_lowercase();
    let mut normalized = String::with_capacity(lower.len());
    for ch in lower.chars() {
        match ch {
            '.' | '!' | '?' | ',' | ';' | ':' => normalized.push('|'),
            c if c.is_alphanumeric() || c == '\'' => normalized.push(c),
            _ => normalized.push(' '),
        }
    }

    let mut phrases = Vec::new();
    for fragment in normalized.split('|') {
        let mut current: Vec<String> = Vec::new();
        for word in fragment.split_whitespace() {
            let word = word.trim_matches('\'');
            if word.len() < 2 || is_stop_word(word) {
                if !current.is_empty() {
                    phrases.push(std::mem::take(&mut current));
                }
            } else {
                current.push(word.to_string());
            }
        }
        if !current.is_empty() {
            phrases.push(current);
        }
    }
    phrases
}

// ============ Composition ============

/// Keyword lists for one document, plus a term-boosted text used to
/// concentrate sparse-vector signal in the super-header.
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    pub rake: Vec<(String, f64)>,
    pub tfidf: Vec<(String, f64)>,
    pub boosted_text: String,
}

/// Terms kept from each list by [`extract_keywords`].
pub const KEYWORDS_PER_LIST: usize = 10;

/// Run RAKE and TF-IDF for a document and derive the boosted text: each
/// top term repeated `ceil(3 * normalized_weight)` times, capped at 5.
pub fn extract_keywords(
    model: &TfIdfModel,
    id: &str,
    text: &str,
) -> Result<KeywordSet, TfIdfError> {
    let rake = rake_keywords(text, KEYWORDS_PER_LIST);
    let tfidf = model.top_terms(id, KEYWORDS_PER_LIST)?;

    let mut boosted: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for list in [&rake, &tfidf] {
        let max_weight = list
            .iter()
            .map(|(_, w)| *w)
            .fold(f64::NEG_INFINITY, f64::max);
        for (term, weight) in list {
            if max_weight <= 0.0 || !seen.insert(term.as_str()) {
                continue;
            }
            let repeats = ((3.0 * weight / max_weight).ceil() as usize).clamp(1, 5);
            for _ in 0..repeats {
                boosted.push(term.clone());
            }
        }
    }

    Ok(KeywordSet {
        rake,
        tfidf,
        boosted_text: boosted.join(" "),
    })
}
