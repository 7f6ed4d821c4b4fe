//! History filtering and KPI aggregation for the metrics view.

use serde::Serialize;

use crate::calibration::round1;
use crate::record::{AnalysisRecord, Verdict};

/// Score at or above which an item is flagged in the high-risk KPI.
pub const HIGH_RISK_SCORE: u8 = 75;

/// Case-insensitive substring match over title, source and body. Blank query keeps everything.
pub fn filter<'a>(records: &'a [AnalysisRecord], query: &str) -> Vec<&'a AnalysisRecord> {
    let term = query.trim().to_lowercase();
    records
        .iter()
        .filter(|r| {
            term.is_empty()
                || r.item.title.to_lowercase().contains(&term)
                || r.item.source.to_lowercase().contains(&term)
                || r.item.body.to_lowercase().contains(&term)
        })
        .collect()
}

/// Newest first, at most `limit`.
pub fn newest_first<'a>(mut records: Vec<&'a AnalysisRecord>, limit: usize) -> Vec<&'a AnalysisRecord> {
    records.sort_by(|a, b| b.id.cmp(&a.id));
    records.truncate(limit);
    records
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerdictCounts {
    pub real: usize,
    pub dudosa: usize,
    pub falsa: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub total: usize,
    pub avg_score: f64,
    pub avg_latency_ms: u64,
    pub high_risk: usize,
    pub verdicts: VerdictCounts,
}

pub fn kpis(records: &[&AnalysisRecord]) -> Kpis {
    let total = records.len();
    if total == 0 {
        return Kpis::default();
    }
    let score_sum: f64 = records.iter().map(|r| r.final_result.score as f64).sum();
    let latency_sum: u64 = records.iter().map(|r| r.latency_ms).sum();

    let mut verdicts = VerdictCounts::default();
    for r in records {
        match r.final_result.verdict {
            Verdict::Real => verdicts.real += 1,
            Verdict::Dudosa => verdicts.dudosa += 1,
            Verdict::Falsa => verdicts.falsa += 1,
            Verdict::NoNoticia => verdicts.other += 1,
        }
    }

    Kpis {
        total,
        avg_score: round1(score_sum / total as f64),
        avg_latency_ms: (latency_sum as f64 / total as f64).round() as u64,
        high_risk: records
            .iter()
            .filter(|r| r.final_result.score >= HIGH_RISK_SCORE)
            .count(),
        verdicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::analysis;

    #[test]
    fn filter_and_order() {
        let mut a = analysis(1, "Sismo en Lima", "cuerpo", 40);
        a.item.source = "RPP".into();
        let b = analysis(2, "Bono familiar", "el gobierno anuncia", 80);
        let c = analysis(3, "Otro sismo", "", 20);
        let all = vec![a, b, c];

        let hits = newest_first(filter(&all, "SISMO"), 10);
        assert_eq!(hits.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(filter(&all, "rpp").len(), 1);
        assert_eq!(filter(&all, "gobierno").len(), 1);
        assert_eq!(newest_first(filter(&all, "  "), 2).len(), 2);
    }

    #[test]
    fn kpis_over_records() {
        let mut a = analysis(1, "a", "", 80);
        a.latency_ms = 100;
        let mut b = analysis(2, "b", "", 75);
        b.latency_ms = 201;
        b.final_result.verdict = Verdict::Falsa;
        let mut c = analysis(3, "c", "", 10);
        c.latency_ms = 0;
        c.final_result.verdict = Verdict::NoNoticia;

        let all = vec![a, b, c];
        let k = kpis(&filter(&all, ""));
        assert_eq!(k.total, 3);
        assert_eq!(k.avg_score, 55.0);
        assert_eq!(k.avg_latency_ms, 100);
        assert_eq!(k.high_risk, 2);
        assert_eq!(k.verdicts.falsa, 1);
        assert_eq!(k.verdicts.other, 1);
        assert_eq!(kpis(&[]), Kpis::default());
    }
}
