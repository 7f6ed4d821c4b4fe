// src/analyze/mod.rs
//! Analysis pipeline: validate -> prompt -> primary classifier -> parse-with-defaults
//! -> secondary scorer (bounded) -> combine -> explain -> append.
//!
//! Storage is touched twice per request: one read at the start (prompt examples) and
//! one append at the end. No lock is held across the upstream calls.

pub mod ai_adapter;
pub mod secondary;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{combine, unavailable_block, CombinePolicy, PrimaryEstimate, SecondaryEstimate};
use crate::explain::explain;
use crate::history::{AppendLog, StoreError};
use crate::record::{next_id, AnalysisRecord, FinalResult, NewsItem, SecondaryBlock};

pub use ai_adapter::{build_prompt, parse_classification, ClassifierClient, DynClassifier};
pub use secondary::{SecondaryRequest, SecondaryScorer};

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("title or body is required")]
    EmptyInput,
    #[error("primary classifier unavailable")]
    ClassifierUnavailable,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub combine: CombinePolicy,
    pub secondary_timeout: Duration,
    pub prompt_examples: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            combine: CombinePolicy::default(),
            secondary_timeout: Duration::from_secs(10),
            prompt_examples: 10,
        }
    }
}

pub struct Pipeline {
    classifier: DynClassifier,
    secondary: Option<Arc<dyn SecondaryScorer>>,
    analyses: Arc<dyn AppendLog<AnalysisRecord>>,
    settings: PipelineSettings,
}

/// What the pipeline produced besides the record itself.
#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub record: AnalysisRecord,
    /// The classifier reply contained a parseable JSON object.
    pub well_formed_reply: bool,
}

impl Pipeline {
    pub fn new(
        classifier: DynClassifier,
        secondary: Option<Arc<dyn SecondaryScorer>>,
        analyses: Arc<dyn AppendLog<AnalysisRecord>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            classifier,
            secondary,
            analyses,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn analyze(&self, item: NewsItem) -> Result<AnalyzeOutcome, AnalyzeError> {
        if item.is_empty() {
            return Err(AnalyzeError::EmptyInput);
        }
        let started = Instant::now();
        let item_id = anon_hash(&format!("{}\n{}", item.title, item.body));

        // (1) In-context examples from the most recent analyses.
        let examples = self.analyses.last_n(self.settings.prompt_examples).await?;
        let prompt = build_prompt(&item, &examples);

        // (2) Primary classifier.
        let Some(reply) = self.classifier.classify(&prompt).await else {
            warn!(%item_id, provider = self.classifier.provider_name(), "primary classifier unavailable");
            counter!("triage_classifier_unavailable_total").increment(1);
            return Err(AnalyzeError::ClassifierUnavailable);
        };
        let parsed = parse_classification(&reply);
        if !parsed.well_formed {
            warn!(%item_id, reply_len = reply.len(), "classifier reply had no JSON object; using defaults");
            counter!("triage_classifier_parse_fallback_total").increment(1);
        }
        let primary = parsed.classification;

        // (3) Secondary scorer; failure or timeout degrades to primary-only.
        let (ml, secondary_estimate) = match &self.secondary {
            None => (None, None),
            Some(scorer) => match self.score_secondary(scorer.as_ref(), &item, &primary, &item_id).await {
                Some(block) => {
                    let est = SecondaryEstimate::from_block(&block);
                    (Some(block), Some(est))
                }
                None => {
                    counter!("triage_secondary_fallback_total").increment(1);
                    (Some(unavailable_block(primary.score)), None)
                }
            },
        };

        // (4) Combine + explain.
        let combined = combine(
            PrimaryEstimate {
                score: primary.score,
                verdict: primary.verdict,
            },
            secondary_estimate,
            &self.settings.combine,
        );
        let explanations = explain(
            Some(combined.score as f64),
            Some(combined.verdict),
            &primary.labels,
        );

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = AnalysisRecord {
            id: next_id(),
            item,
            final_result: FinalResult {
                score: combined.score,
                verdict: combined.verdict,
                confidence: combined.confidence,
                method: combined.method,
                explanation: primary.rationale.clone(),
            },
            primary,
            ml,
            explanations,
            model: self.classifier.model_name().to_string(),
            latency_ms,
            created_at: Utc::now(),
        };

        // (5) Persist; a failed append fails the request.
        let record = self.analyses.append(record).await?;

        counter!("triage_analyses_total").increment(1);
        histogram!("triage_analysis_duration_ms").record(latency_ms as f64);
        info!(
            %item_id,
            id = record.id,
            score = record.final_result.score,
            verdict = %record.final_result.verdict,
            method = ?record.final_result.method,
            latency_ms,
            "analysis stored"
        );

        Ok(AnalyzeOutcome {
            record,
            well_formed_reply: parsed.well_formed,
        })
    }

    async fn score_secondary(
        &self,
        scorer: &dyn SecondaryScorer,
        item: &NewsItem,
        primary: &crate::record::Classification,
        item_id: &str,
    ) -> Option<SecondaryBlock> {
        let req = SecondaryRequest {
            title: item.title.clone(),
            body: item.body.clone(),
            source: item.source.clone(),
            primary_score: primary.score,
            primary_verdict: primary.verdict.to_string(),
        };
        match tokio::time::timeout(self.settings.secondary_timeout, scorer.score(&req)).await {
            Ok(Ok(block)) => Some(block),
            Ok(Err(e)) => {
                warn!(%item_id, scorer = scorer.name(), error = %e, "secondary scorer failed");
                None
            }
            Err(_) => {
                warn!(
                    %item_id,
                    scorer = scorer.name(),
                    timeout_ms = self.settings.secondary_timeout.as_millis() as u64,
                    "secondary scorer timed out"
                );
                None
            }
        }
    }
}

/// Short anonymized id for logs; raw text is never logged.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
