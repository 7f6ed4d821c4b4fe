//! Verified label -> canonical credibility score.

/// Score for labels outside the table (or missing).
pub const NEUTRAL_SCORE: u8 = 50;

/// Fixed table; lookup is case-insensitive exact match.
pub const LABEL_SCORES: &[(&str, u8)] = &[
    ("real", 85),
    ("verdadero", 85),
    ("confiable", 80),
    ("dudoso", 40),
    ("falso", 20),
    ("fake", 15),
    ("engañoso", 30),
];

pub fn label_to_score(label: &str) -> u8 {
    let l = label.trim().to_lowercase();
    LABEL_SCORES
        .iter()
        .find(|(k, _)| *k == l)
        .map(|(_, v)| *v)
        .unwrap_or(NEUTRAL_SCORE)
}
