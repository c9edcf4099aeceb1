//! Exact token counting, context-limit splitting, and stop-word stripping.
//!
//! Token counts come from the embedding model's own BPE (`cl100k_base`),
//! not a chars-per-token heuristic: callers use these values to decide
//! whether an input fits a hard context limit, so the count must match
//! what the service will see. A string-keyed cache absorbs the repeated
//! counting the chunker does over the same paragraphs.

use std::collections::{HashMap, HashSet};
use std::sync::{OnceLock, RwLock};

use anyhow::Result;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// English stop-words, used as-is by [`strip_stops`], as phrase delimiters
/// by RAKE, and as the filter for sparse-vector construction.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does",
    "doesn't", "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had",
    "hadn't", "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's", "her",
    "here", "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd",
    "i'll", "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself",
    "let's", "me", "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off",
    "on", "once", "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over",
    "own", "same", "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so",
    "some", "such", "than", "that", "that's", "the", "their", "theirs", "them", "themselves",
    "then", "there", "there's", "these", "they", "they'd", "they'll", "they're", "they've",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "wasn't",
    "we", "we'd", "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when",
    "when's", "where", "where's", "which", "while", "who", "who's", "whom", "why", "why's",
    "with", "won't", "would", "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your",
    "yours", "yourself", "yourselves",
];

fn stop_word_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// True if `word` (any casing) is on the stop-word list.
pub fn is_stop_word(word: &str) -> bool {
    stop_word_set().contains(word.to_lowercase().as_str())
}

/// Token counter over the `cl100k_base` BPE with a per-run string cache.
///
/// The cache is write-mostly-idempotent: the same string always maps to the
/// same count, and entries are never evicted, so concurrent readers are safe.
pub struct Tokenizer {
    bpe: CoreBPE,
    cache: RwLock<HashMap<String, usize>>,
}

impl Tokenizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bpe: cl100k_base()?,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Exact encoded token count for `text`.
    pub fn token_len(&self, text: &str) -> usize {
        if let Some(&n) = self.cache.read().unwrap().get(text) {
            return n;
        }
        let n = self.bpe.encode_ordinary(text).len();
        self.cache.write().unwrap().insert(text.to_string(), n);
        n
    }

    /// Bisect `text` until every piece fits within `ctx` tokens.
    ///
    /// Splits at the latest sentence-terminating punctuation before the
    /// character midpoint, falling back to the raw midpoint when no
    /// boundary lies after the first 100 characters. Pieces are trimmed.
    pub fn split_to_fit(&self, text: &str, ctx: usize) -> Vec<String> {
        if self.token_len(text) <= ctx {
            return vec![text.to_string()];
        }
        let at = sentence_split_point(text);
        if at == 0 || at >= text.len() {
            // Degenerate input that cannot be bisected further.
            return vec![text.to_string()];
        }
        let (left, right) = text.split_at(at);
        let mut out = Vec::new();
        for half in [left.trim(), right.trim()] {
            if half.is_empty() {
                continue;
            }
            out.extend(self.split_to_fit(half, ctx));
        }
        out
    }
}

/// Byte index of the bisection point for `text`.
///
/// The latest `.`/`!`/`?` before the character midpoint wins, provided it
/// sits after the first 100 characters; otherwise the raw midpoint.
pub fn sentence_split_point(text: &str) -> usize {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.len() < 2 {
        return 0;
    }
    let mid = chars.len() / 2;

    for i in (0..mid).rev() {
        if matches!(chars[i].1, '.' | '!' | '?') {
            if i > 100 {
                // Split just after the punctuation.
                return chars
                    .get(i + 1)
                    .map(|(b, _)| *b)
                    .unwrap_or_else(|| text.len());
            }
            break;
        }
    }

    chars[mid].0
}

/// Split `text` into sentences at `.`/`!`/`?` followed by whitespace
/// (or end of input). Pieces are trimmed; empty pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = match chars.peek() {
                Some((_, next)) => next.is_whitespace(),
                None => true,
            };
            if at_boundary {
                let end = i + ch.len_utf8();
                let piece = text[start..end].trim();
                if !piece.is_empty() {
                    sentences.push(piece.to_string());
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Remove stop-words from `text`, preserving the casing and relative order
/// of everything else, then collapse whitespace runs to single spaces.
pub fn strip_stops(text: &str) -> String {
    static WORD_RE: OnceLock<regex::Regex> = OnceLock::new();
    let word_re = WORD_RE.get_or_init(|| regex::Regex::new(r"[A-Za-z0-9]+(?:'[A-Za-z]+)?").unwrap());

    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for m in word_re.find_iter(text) {
        out.push_str(&text[last_end..m.start()]);
        if !is_stop_word(m.as_str()) {
            out.push_str(m.as_str());
        }
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);

    static SPACE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let space_re = SPACE_RE.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    space_re.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_len_cached() {
        let tok = Tokenizer::new().unwrap();
        let a = tok.token_len("hello world, this is a test");
        let b = tok.token_len("hello world, this is a test");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn test_split_to_fit_identity_when_fits() {
        let tok = Tokenizer::new().unwrap();
        let text = "A short sentence.";
        assert_eq!(tok.split_to_fit(text, 100), vec![text.to_string()]);
    }

    #[test]
    fn test_split_to_fit_pieces_within_ctx() {
        let tok = Tokenizer::new().unwrap();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let pieces = tok.split_to_fit(&text, 64);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(
                tok.token_len(piece) <= 64,
                "piece over ctx: {} tokens",
                tok.token_len(piece)
            );
        }
    }

    #[test]
    fn test_split_prefers_sentence_boundary() {
        // Midpoint lands mid-sentence; the boundary after char 100 wins.
        let text = format!("{}. {}", "x".repeat(150), "y".repeat(160));
        let at = sentence_split_point(&text);
        assert_eq!(&text[at - 1..at], ".");
    }

    #[test]
    fn test_split_falls_back_to_midpoint() {
        // The only punctuation sits inside the first 100 chars.
        let text = format!("ab. {}", "z".repeat(300));
        let at = sentence_split_point(&text);
        assert_eq!(at, text.len() / 2);
    }

    #[test]
    fn test_split_sentences_basic() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_split_sentences_ellipsis() {
        let s = split_sentences("Wait... what happened");
        assert_eq!(s, vec!["Wait...", "what happened"]);
    }

    #[test]
    fn test_strip_stops_preserves_casing() {
        assert_eq!(
            strip_stops("The Kubernetes operator is a pattern"),
            "Kubernetes operator pattern"
        );
    }

    #[test]
    fn test_strip_stops_collapses_whitespace() {
        assert_eq!(strip_stops("the   and   of"), "");
        assert_eq!(strip_stops("  rust   and   tokio  "), "rust tokio");
    }

    #[test]
    fn test_strip_stops_empty() {
        assert_eq!(strip_stops(""), "");
    }
}
