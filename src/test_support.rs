//! Fixtures shared by unit tests.

use chrono::Utc;

use crate::explain::explain;
use crate::record::{
    AnalysisRecord, Checks, Classification, CombineMethod, FinalResult, NewsItem, Verdict,
};

/// Stored analysis with a primary-only final result equal to `score`.
pub(crate) fn analysis(id: i64, title: &str, body: &str, score: u8) -> AnalysisRecord {
    let verdict = Verdict::Dudosa;
    AnalysisRecord {
        id,
        item: NewsItem::new("", title, body),
        primary: Classification {
            score,
            verdict,
            labels: Vec::new(),
            rationale: "fixture".into(),
            evidence: Vec::new(),
            checks: Checks::default(),
        },
        ml: None,
        final_result: FinalResult {
            score,
            verdict,
            confidence: score as f64 / 100.0,
            method: CombineMethod::PrimaryOnlyFallback,
            explanation: "fixture".into(),
        },
        explanations: explain(Some(score as f64), Some(verdict), &[]),
        model: "mock".into(),
        latency_ms: 0,
        created_at: Utc::now(),
    }
}
