//! Sparse vector construction.
//!
//! Maps text to a bounded bag-of-terms: stop-words are stripped, each
//! remaining token is hashed to a stable 32-bit term id (the first four
//! bytes, big-endian, of the MD5 digest of the token's UTF-8 bytes), and
//! the top `max_terms` most frequent terms are kept. Hash collisions at
//! this width occur naturally and are not resolved.

use std::collections::HashMap;

use crate::models::SparseVector;
use crate::tokenize::strip_stops;

/// Default top-K term budget.
pub const DEFAULT_MAX_TERMS: usize = 1536;

/// Stable 32-bit term id for a token.
pub fn term_id(token: &str) -> u32 {
    let digest = md5::compute(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Build a [`SparseVector`] from `text`, keeping at most `max_terms` terms.
///
/// Empty input (or input that is all stop-words) produces empty arrays.
/// Values are raw occurrence counts, emitted in non-increasing order.
pub fn to_sparse_vector(text: &str, max_terms: usize) -> SparseVector {
    let stripped = strip_stops(text);
    if stripped.is_empty() {
        return SparseVector::default();
    }

    let mut counts: HashMap<u32, u32> = HashMap::new();
    for token in stripped.split_whitespace() {
        *counts.entry(term_id(token)).or_insert(0) += 1;
    }

    let mut pairs: Vec<(u32, u32)> = counts.into_iter().collect();
    // Count descending; term id ascending as a deterministic tie-break.
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs.truncate(max_terms);

    SparseVector {
        indices: pairs.iter().map(|(id, _)| *id).collect(),
        values: pairs.iter().map(|(_, n)| *n).collect(),
    }
}
