//! Lexical overlap between two free-text documents.
//!
//! Jaccard similarity over sets of lower-cased whitespace tokens longer than
//! three characters. It is a cheap proxy: no stemming, no stopwords beyond the
//! length filter, so paraphrases and translations score close to zero.

use std::collections::HashSet;

/// Tokens of this many characters or fewer are ignored.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Distinct qualifying tokens of `text`.
pub fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() > MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity in [0, 1]. Symmetric; 0 when either side has no qualifying token.
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(&token_set(a), &token_set(b))
}

/// Jaccard over pre-tokenized sets, for callers comparing one document against many.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}
