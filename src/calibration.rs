//! # Calibration Engine
//! Retroactively re-scores stored analyses against the verified-label reference
//! corpus and reports how far the system drifts from it.
//!
//! Observational only: stored analyses are never modified, the outcome is a
//! `CalibrationLogEntry` to be appended to its own log.
//!
//! Cost is O(analyses × corpus) similarity comparisons on every run. Fine for
//! corpora in the thousands; not horizontally scalable.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::labels::label_to_score;
use crate::record::{AnalysisRecord, CalibrationLogEntry, CalibrationResult, ReferenceArticle};
use crate::similarity::{jaccard, token_set};

/// Tunable calibration parameters (`[calibration]` in the config file).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationPolicy {
    /// A reference matches when similarity is strictly above this.
    pub similarity_threshold: f64,
    /// Weight of the analysis' own score in the blend.
    pub original_weight: f64,
    /// Weight of the averaged verified score in the blend.
    pub verified_weight: f64,
    /// How many of the most recent analyses a run considers.
    pub recent_window: usize,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            original_weight: 0.6,
            verified_weight: 0.4,
            recent_window: 50,
        }
    }
}

impl CalibrationPolicy {
    /// Replace out-of-range values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            self.similarity_threshold = d.similarity_threshold;
        }
        if !(0.0..=1.0).contains(&self.original_weight) {
            self.original_weight = d.original_weight;
        }
        if !(0.0..=1.0).contains(&self.verified_weight) {
            self.verified_weight = d.verified_weight;
        }
        self.recent_window = self.recent_window.max(1);
        self
    }

    /// The tail of `all` this policy considers.
    pub fn recent<'a, T>(&self, all: &'a [T]) -> &'a [T] {
        let start = all.len().saturating_sub(self.recent_window);
        &all[start..]
    }
}

/// Round to one decimal place.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// A reference article reduced to its token set and verified score.
pub type PreparedReference = (HashSet<String>, u8);

/// Tokenize the corpus once; each entry is compared against every analysis.
pub fn prepare_corpus(corpus: &[ReferenceArticle]) -> Vec<PreparedReference> {
    corpus
        .iter()
        .map(|r| (token_set(&r.document()), label_to_score(&r.label)))
        .collect()
}

/// Calibrate a single analysis. `None` when no reference is similar enough.
pub fn calibrate_one(
    analysis: &AnalysisRecord,
    corpus: &[PreparedReference],
    policy: &CalibrationPolicy,
) -> Option<CalibrationResult> {
    score_one(analysis, corpus, policy).map(|(result, _)| result)
}

/// The displayed result plus the unrounded accuracy used for run averages.
fn score_one(
    analysis: &AnalysisRecord,
    corpus: &[PreparedReference],
    policy: &CalibrationPolicy,
) -> Option<(CalibrationResult, f64)> {
    let doc = token_set(&analysis.document());
    let matched: Vec<u8> = corpus
        .iter()
        .filter(|(tokens, _)| jaccard(&doc, tokens) > policy.similarity_threshold)
        .map(|(_, score)| *score)
        .collect();

    if matched.is_empty() {
        return None;
    }

    let verified = matched.iter().map(|s| *s as f64).sum::<f64>() / matched.len() as f64;
    let original = analysis.final_result.score as f64;
    let blended = original * policy.original_weight + verified * policy.verified_weight;
    let calibrated = round1(blended).clamp(0.0, 100.0);
    let accuracy = (100.0 - (calibrated - verified).abs()).max(0.0);

    let result = CalibrationResult {
        analysis_id: analysis.id,
        original_score: original,
        verified_score: round1(verified),
        calibrated_score: calibrated,
        matches_found: matched.len(),
        accuracy: round1(accuracy),
    };
    Some((result, accuracy))
}

/// Run calibration over `analyses` (already windowed by the caller) against the full corpus.
pub fn calibrate(
    analyses: &[AnalysisRecord],
    corpus: &[ReferenceArticle],
    policy: &CalibrationPolicy,
    now: DateTime<Utc>,
) -> CalibrationLogEntry {
    let prepared = prepare_corpus(corpus);

    let mut results = Vec::new();
    let mut accuracy_sum = 0.0;
    for a in analyses {
        match score_one(a, &prepared, policy) {
            Some((r, raw_accuracy)) => {
                debug!(analysis_id = a.id, matches = r.matches_found, calibrated = r.calibrated_score, "calibrated");
                accuracy_sum += raw_accuracy;
                results.push(r);
            }
            None => debug!(analysis_id = a.id, "no reference coverage"),
        }
    }

    let total = analyses.len();
    let matched = results.len();
    let calibration_rate = if total > 0 {
        round1(matched as f64 / total as f64 * 100.0)
    } else {
        0.0
    };
    let average_accuracy = if matched > 0 {
        round1(accuracy_sum / matched as f64)
    } else {
        0.0
    };

    CalibrationLogEntry {
        timestamp: now,
        total_analyses: total,
        calibrated_analyses: matched,
        calibration_rate,
        average_accuracy,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::analysis;

    fn corpus() -> Vec<ReferenceArticle> {
        vec![
            ReferenceArticle::new("Sismo sacude Lima", "fuerte sismo sacude Lima esta mañana", "falso"),
            ReferenceArticle::new("Gobierno anuncia bono", "nuevo bono familiar anunciado hoy", "real"),
        ]
    }

    #[test]
    fn unmatched_analysis_counts_only_as_considered() {
        let analyses = vec![
            analysis(1, "Sismo sacude Lima", "fuerte sismo sacude Lima esta mañana", 70),
            analysis(2, "Receta de ceviche", "pescado limón cebolla", 90),
        ];
        let log = calibrate(&analyses, &corpus(), &CalibrationPolicy::default(), Utc::now());

        assert_eq!(log.total_analyses, 2);
        assert_eq!(log.calibrated_analyses, 1);
        assert_eq!(log.calibration_rate, 50.0);
        assert_eq!(log.results.len(), 1);
        // 70*0.6 + 20*0.4 = 50 ; accuracy = 100 - |50 - 20| = 70
        let r = &log.results[0];
        assert_eq!(r.analysis_id, 1);
        assert_eq!(r.calibrated_score, 50.0);
        assert_eq!(r.accuracy, 70.0);
        assert_eq!(log.average_accuracy, 70.0);
    }

    #[test]
    fn averages_multiple_matches() {
        let corpus = vec![
            ReferenceArticle::new("vacuna gratuita campaña nacional", "", "real"),
            ReferenceArticle::new("vacuna gratuita campaña nacional", "", "fake"),
        ];
        let a = analysis(7, "vacuna gratuita campaña nacional", "", 40);
        let log = calibrate(&[a], &corpus, &CalibrationPolicy::default(), Utc::now());
        let r = &log.results[0];
        assert_eq!(r.matches_found, 2);
        // avg verified = (85 + 15) / 2 = 50 ; 40*0.6 + 50*0.4 = 44
        assert_eq!(r.verified_score, 50.0);
        assert_eq!(r.calibrated_score, 44.0);
        assert_eq!(r.accuracy, 94.0);
    }

    #[test]
    fn average_uses_unrounded_accuracies() {
        // verified = (85 + 20 + 40) / 3 = 48.33; calibrated score = original score
        let policy = CalibrationPolicy {
            original_weight: 1.0,
            verified_weight: 0.0,
            ..Default::default()
        };
        let corpus = vec![
            ReferenceArticle::new("alerta sanitaria nacional", "", "real"),
            ReferenceArticle::new("alerta sanitaria nacional", "", "falso"),
            ReferenceArticle::new("alerta sanitaria nacional", "", "dudoso"),
        ];
        let analyses = vec![
            analysis(1, "alerta sanitaria nacional", "", 48),
            analysis(2, "alerta sanitaria nacional", "", 48),
            analysis(3, "alerta sanitaria nacional", "", 47),
        ];
        let log = calibrate(&analyses, &corpus, &policy, Utc::now());

        // Displayed per-analysis values are rounded: 99.67 -> 99.7, 98.67 -> 98.7.
        let shown: Vec<f64> = log.results.iter().map(|r| r.accuracy).collect();
        assert_eq!(shown, vec![99.7, 99.7, 98.7]);
        // Mean of raw values is 99.33; the mean of rounded ones would give 99.4.
        assert_eq!(log.average_accuracy, 99.3);
    }

    #[test]
    fn threshold_is_exclusive() {
        // {alpha, bravo, charlie} vs {alpha, bravo, charlie, delta, echo}: 3/5 = 0.6
        let corpus = vec![ReferenceArticle::new("alpha bravo charlie delta echo", "", "real")];
        let a = analysis(1, "alpha bravo charlie", "", 50);
        let log = calibrate(&[a], &corpus, &CalibrationPolicy::default(), Utc::now());
        assert_eq!(log.calibrated_analyses, 0);
        assert_eq!(log.average_accuracy, 0.0);
    }

    #[test]
    fn calibrated_score_is_clamped() {
        let policy = CalibrationPolicy {
            original_weight: 1.0,
            verified_weight: 1.0,
            ..Default::default()
        };
        let corpus = vec![ReferenceArticle::new("bono familiar anunciado", "", "real")];
        let a = analysis(1, "bono familiar anunciado", "", 95);
        let log = calibrate(&[a], &corpus, &policy, Utc::now());
        assert_eq!(log.results[0].calibrated_score, 100.0);
    }

    #[test]
    fn empty_inputs_do_not_fail() {
        let log = calibrate(&[], &[], &CalibrationPolicy::default(), Utc::now());
        assert_eq!(log.total_analyses, 0);
        assert_eq!(log.calibration_rate, 0.0);
        assert!(log.results.is_empty());
    }

    #[test]
    fn recent_takes_tail() {
        let p = CalibrationPolicy {
            recent_window: 2,
            ..Default::default()
        };
        assert_eq!(p.recent(&[1, 2, 3]), &[2, 3]);
        assert_eq!(p.recent(&[1]), &[1]);
    }

    #[test]
    fn sanitized_restores_bad_values() {
        let p = CalibrationPolicy {
            similarity_threshold: 3.0,
            original_weight: -1.0,
            verified_weight: 0.3,
            recent_window: 0,
        }
        .sanitized();
        assert_eq!(p.similarity_threshold, 0.6);
        assert_eq!(p.original_weight, 0.6);
        assert_eq!(p.verified_weight, 0.3);
        assert_eq!(p.recent_window, 1);
    }
}
