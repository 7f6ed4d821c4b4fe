//! # Result Combiner
//! Pure, testable logic that merges the primary classifier's (score, verdict)
//! with the secondary scorer's (score, verdict, confidence) into one final result.
//! No I/O, suitable for unit tests and offline replays.
//!
//! Policy: weighted score blend when both estimates exist; the secondary's verdict
//! wins only when its confidence is strictly above the gate. Without a usable
//! secondary estimate the primary passes through unchanged.

use serde::{Deserialize, Serialize};

use crate::record::{CombineMethod, SecondaryBlock, Verdict};

/// Tunable weighting policy (`[combine]` in the config file).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinePolicy {
    pub primary_weight: f64,
    pub secondary_weight: f64,
    /// Secondary verdict is adopted only when its confidence is above this.
    pub confidence_gate: f64,
}

impl Default for CombinePolicy {
    fn default() -> Self {
        Self {
            primary_weight: 0.4,
            secondary_weight: 0.6,
            confidence_gate: 0.7,
        }
    }
}

impl CombinePolicy {
    /// Replace out-of-range values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(0.0..=1.0).contains(&self.primary_weight) {
            self.primary_weight = d.primary_weight;
        }
        if !(0.0..=1.0).contains(&self.secondary_weight) {
            self.secondary_weight = d.secondary_weight;
        }
        if !(0.0..=1.0).contains(&self.confidence_gate) {
            self.confidence_gate = d.confidence_gate;
        }
        self
    }
}

/// Primary classifier estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryEstimate {
    pub score: u8,
    pub verdict: Verdict,
}

/// Secondary scorer estimate. `verdict` is `None` when the scorer's label is not
/// part of the verdict vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryEstimate {
    pub score: f64,
    pub verdict: Option<Verdict>,
    pub confidence: f64,
}

impl SecondaryEstimate {
    pub fn from_block(b: &SecondaryBlock) -> Self {
        Self {
            score: b.ml_score,
            verdict: Verdict::from_label(&b.ml_verdict),
            confidence: b.ml_confidence,
        }
    }
}

/// Combined (score, verdict, confidence, method).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combined {
    pub score: u8,
    pub verdict: Verdict,
    pub confidence: f64,
    pub method: CombineMethod,
}

/// Merge both estimates. `secondary = None` means absent or failed.
pub fn combine(
    primary: PrimaryEstimate,
    secondary: Option<SecondaryEstimate>,
    policy: &CombinePolicy,
) -> Combined {
    let Some(sec) = secondary.filter(|s| s.score.is_finite() && s.confidence.is_finite()) else {
        return Combined {
            score: primary.score,
            verdict: primary.verdict,
            confidence: clamp01(primary.score as f64 / 100.0),
            method: CombineMethod::PrimaryOnlyFallback,
        };
    };

    let blended =
        primary.score as f64 * policy.primary_weight + sec.score * policy.secondary_weight;
    let score = blended.round().clamp(0.0, 100.0) as u8;

    // Confidence is a hard gate, not blended.
    let verdict = match sec.verdict {
        Some(v) if sec.confidence > policy.confidence_gate => v,
        _ => primary.verdict,
    };

    Combined {
        score,
        verdict,
        confidence: clamp01(sec.confidence),
        method: CombineMethod::Balanced,
    }
}

/// Placeholder recorded when the secondary scorer could not be reached:
/// passes the primary score through, marks the verdict as `"error"`.
pub fn unavailable_block(primary_score: u8) -> SecondaryBlock {
    SecondaryBlock {
        ml_verdict: "error".to_string(),
        ml_score: primary_score as f64,
        ml_confidence: 0.5,
        ml_features_used: 0,
        ml_model_accuracy: None,
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
