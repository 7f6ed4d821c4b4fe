//! CSV export of stored analyses (RFC 4180 quoting, CRLF rows).

use crate::record::AnalysisRecord;

pub const CSV_HEADERS: &[&str] = &[
    "id",
    "created_at",
    "source",
    "title",
    "score",
    "verdict",
    "labels",
    "rationale",
    "latency_ms",
    "model",
    "final_score",
    "final_verdict",
    "method",
];

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

pub fn to_csv(records: &[AnalysisRecord]) -> String {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(CSV_HEADERS.join(","));
    for r in records {
        let method = serde_json::to_value(r.final_result.method)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let fields = [
            r.id.to_string(),
            r.created_at.to_rfc3339(),
            r.item.source.clone(),
            r.item.title.clone(),
            r.primary.score.to_string(),
            r.primary.verdict.to_string(),
            r.primary.labels.join("|"),
            r.primary.rationale.clone(),
            r.latency_ms.to_string(),
            r.model.clone(),
            r.final_result.score.to_string(),
            r.final_result.verdict.to_string(),
            method,
        ];
        rows.push(fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","));
    }
    rows.join("\r\n")
}
