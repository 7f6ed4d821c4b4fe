//! record.rs — Persisted shapes: analyses, reference articles, feedback and calibration logs.
//!
//! All four live in independent append-only collections (see `history`). Nothing here
//! is ever edited in place once appended; corrections go through `FeedbackRecord`.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Classification outcome for a news item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Real,
    Falsa,
    NoNoticia,
    Dudosa,
}

impl Verdict {
    /// Lenient mapping from upstream labels (LLM output, secondary scorer, datasets).
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "real" | "verdadera" | "verdadero" | "true" => Some(Verdict::Real),
            "falsa" | "falso" | "false" | "fake" | "noticia falsa" => Some(Verdict::Falsa),
            "no_noticia" | "no noticia" => Some(Verdict::NoNoticia),
            "dudosa" | "dudoso" | "no_verificable" => Some(Verdict::Dudosa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Real => "real",
            Verdict::Falsa => "falsa",
            Verdict::NoNoticia => "no_noticia",
            Verdict::Dudosa => "dudosa",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate item as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl NewsItem {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            body: body.into(),
        }
    }

    /// Title and body are both blank.
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }
}

/// One claim checked by the primary classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub claim: String,
    /// "soporta" | "refuta" | "incierto"
    pub assessment: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Three nullable sanity checks reported by the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checks {
    pub fecha_coherente: Option<bool>,
    pub fuente_identificable: Option<bool>,
    pub consenso_en_fuentes: Option<bool>,
}

/// Fully-populated primary classifier output (after parse-with-defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub score: u8,
    pub verdict: Verdict,
    #[serde(default)]
    pub labels: Vec<String>,
    pub rationale: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub checks: Checks,
}

/// Secondary scorer block as reported back to the client and persisted.
/// `verdict` stays free-form: the scorer has its own vocabulary and `"error"`
/// marks the neutral placeholder used when the scorer was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryBlock {
    pub ml_verdict: String,
    pub ml_score: f64,
    pub ml_confidence: f64,
    #[serde(default)]
    pub ml_features_used: u32,
    #[serde(default)]
    pub ml_model_accuracy: Option<f64>,
}

/// Which combination policy produced the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    Balanced,
    PrimaryOnlyFallback,
}

/// Combined verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub score: u8,
    pub verdict: Verdict,
    /// Confidence in <0.0, 1.0>.
    pub confidence: f64,
    pub method: CombineMethod,
    #[serde(default)]
    pub explanation: String,
}

/// Confidence tier shown next to the explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Alta,
    Media,
    Baja,
}

/// Tier of the explanation text itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationTier {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    ShareWithConfidence,
    VerifyWithOtherSources,
    DoNotShare,
}

/// Human-readable rationale derived from (score, verdict, labels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub tier: ExplanationTier,
    pub simple: String,
    pub detailed: String,
    pub factors: Vec<String>,
    pub recommendation: Recommendation,
    pub recommendation_text: String,
    pub confidence: ConfidenceTier,
}

/// One classified news item, as appended to `data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    #[serde(flatten)]
    pub item: NewsItem,
    /// Primary classifier output, flattened so older readers see `score`/`verdict` at the top.
    #[serde(flatten)]
    pub primary: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml: Option<SecondaryBlock>,
    #[serde(rename = "final")]
    pub final_result: FinalResult,
    pub explanations: Explanation,
    pub model: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Title + body, the document used for similarity matching.
    pub fn document(&self) -> String {
        format!("{} {}", self.item.title, self.item.body)
    }
}

/// Verified-label corpus entry (`dataset.json`). Accepts the Spanish column names
/// used by curated datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceArticle {
    #[serde(default, alias = "titulo")]
    pub title: String,
    #[serde(default, alias = "cuerpo")]
    pub body: String,
    #[serde(default, alias = "fuente")]
    pub source: String,
    #[serde(default, alias = "etiqueta")]
    pub label: String,
}

impl ReferenceArticle {
    pub fn new(title: impl Into<String>, body: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            source: String::new(),
            label: label.into(),
        }
    }

    pub fn document(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    AnalysisCorrect,
    UserCorrected,
}

/// Human correction referencing an analysis by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: i64,
    pub analysis_id: i64,
    pub correct_score: u8,
    pub correct_verdict: Verdict,
    pub feedback_type: FeedbackKind,
    pub created_at: DateTime<Utc>,
}

/// Per-analysis outcome of a calibration run (matched analyses only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub analysis_id: i64,
    pub original_score: f64,
    pub verified_score: f64,
    pub calibrated_score: f64,
    pub matches_found: usize,
    pub accuracy: f64,
}

/// One run of the calibration engine (`calibration_log.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub total_analyses: usize,
    pub calibrated_analyses: usize,
    pub calibration_rate: f64,
    pub average_accuracy: f64,
    #[serde(default)]
    pub results: Vec<CalibrationResult>,
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond-timestamp ids, strictly increasing within the process.
pub fn next_id() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut prev = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_ID.compare_exchange_weak(prev, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(actual) => prev = actual,
        }
    }
}

/// Raise the id floor so ids issued after a restart stay above persisted ones.
pub fn seed_ids(floor: i64) {
    LAST_ID.fetch_max(floor, Ordering::SeqCst);
}

/// Accepts `42`, `42.0` or `"42"` (HTML inputs submit numbers as strings).
pub(crate) fn de_lenient_score<'de, D>(de: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_continue_above_seeded_floor() {
        // A floor ahead of the clock, as left behind by a previous run.
        let floor = Utc::now().timestamp_millis() + 86_400_000;
        seed_ids(floor);
        let a = next_id();
        let b = next_id();
        assert!(a > floor);
        assert!(b > a);

        // A lower floor never moves ids backwards.
        seed_ids(1);
        assert!(next_id() > b);
    }

    #[test]
    fn verdict_synonyms() {
        assert_eq!(Verdict::from_label("Verdadera"), Some(Verdict::Real));
        assert_eq!(Verdict::from_label(" noticia falsa "), Some(Verdict::Falsa));
        assert_eq!(Verdict::from_label("no_verificable"), Some(Verdict::Dudosa));
        assert_eq!(Verdict::from_label("error"), None);
        assert_eq!(serde_json::to_value(Verdict::NoNoticia).unwrap(), json!("no_noticia"));
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut last = next_id();
        for _ in 0..1000 {
            let id = next_id();
            assert!(id > last, "{id} <= {last}");
            last = id;
        }
    }

    #[test]
    fn reference_accepts_spanish_columns() {
        let r: ReferenceArticle = serde_json::from_value(json!({
            "fuente": "RPP",
            "titulo": "Sismo en Lima",
            "cuerpo": "Un sismo sacudió la capital",
            "etiqueta": "falso"
        }))
        .unwrap();
        assert_eq!(r.title, "Sismo en Lima");
        assert_eq!(r.label, "falso");
        assert_eq!(r.source, "RPP");
    }

    #[test]
    fn lenient_score_accepts_strings() {
        #[derive(Deserialize)]
        struct S {
            #[serde(deserialize_with = "de_lenient_score")]
            v: f64,
        }
        let a: S = serde_json::from_value(json!({ "v": "73" })).unwrap();
        let b: S = serde_json::from_value(json!({ "v": 73 })).unwrap();
        assert_eq!(a.v, 73.0);
        assert_eq!(b.v, 73.0);
        assert!(serde_json::from_value::<S>(json!({ "v": "abc" })).is_err());
    }
}
