// tests/pipeline_degrade.rs
//
// Pipeline behaviour around the secondary scorer: balanced combination when it
// answers, primary-only fallback when it errors or exceeds its time budget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use veracity_triage::ai_adapter::MockClassifier;
use veracity_triage::analyze::secondary::HttpSecondaryScorer;
use veracity_triage::analyze::{Pipeline, PipelineSettings, SecondaryRequest, SecondaryScorer};
use veracity_triage::history::{AppendLog, JsonFileLog, MemoryLog};
use veracity_triage::record::{AnalysisRecord, CombineMethod, NewsItem, SecondaryBlock, Verdict};

const DUDOSA_60: &str = r#"{"score": 60, "verdict": "dudosa", "labels": ["rumor"], "rationale": "Sin fuentes."}"#;

enum Behaviour {
    Answer(SecondaryBlock),
    Fail,
    Hang(Duration),
}

struct StubScorer(Behaviour);

#[async_trait]
impl SecondaryScorer for StubScorer {
    async fn score(&self, req: &SecondaryRequest) -> Result<SecondaryBlock> {
        assert_eq!(req.primary_score, 60, "secondary sees the primary score");
        match &self.0 {
            Behaviour::Answer(b) => Ok(b.clone()),
            Behaviour::Fail => Err(anyhow!("connection refused")),
            Behaviour::Hang(d) => {
                tokio::time::sleep(*d).await;
                Err(anyhow!("unreachable"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn block(verdict: &str, score: f64, confidence: f64) -> SecondaryBlock {
    SecondaryBlock {
        ml_verdict: verdict.into(),
        ml_score: score,
        ml_confidence: confidence,
        ml_features_used: 8,
        ml_model_accuracy: Some(0.8),
    }
}

fn pipeline(behaviour: Behaviour, store: Arc<dyn AppendLog<AnalysisRecord>>) -> Pipeline {
    let settings = PipelineSettings {
        secondary_timeout: Duration::from_millis(200),
        ..PipelineSettings::default()
    };
    Pipeline::new(
        Arc::new(MockClassifier::new(DUDOSA_60)),
        Some(Arc::new(StubScorer(behaviour))),
        store,
        settings,
    )
}

fn item() -> NewsItem {
    NewsItem::new("WhatsApp", "Dicen que habrá corte de agua", "mensaje reenviado")
}

#[tokio::test]
async fn confident_secondary_is_blended_and_overrides_verdict() {
    let store: Arc<MemoryLog<AnalysisRecord>> = Arc::new(MemoryLog::new());
    let p = pipeline(Behaviour::Answer(block("real", 90.0, 0.85)), store.clone());

    let r = p.analyze(item()).await.expect("analyze").record;
    assert_eq!(r.final_result.score, 78);
    assert_eq!(r.final_result.verdict, Verdict::Real);
    assert_eq!(r.final_result.method, CombineMethod::Balanced);
    assert!((r.final_result.confidence - 0.85).abs() < 1e-9);
    assert_eq!(r.ml.as_ref().map(|m| m.ml_verdict.as_str()), Some("real"));
    assert_eq!(store.read_all().await.expect("read").len(), 1);
}

#[tokio::test]
async fn unsure_secondary_keeps_primary_verdict() {
    let store: Arc<MemoryLog<AnalysisRecord>> = Arc::new(MemoryLog::new());
    let p = pipeline(Behaviour::Answer(block("falsa", 10.0, 0.70)), store);

    let r = p.analyze(item()).await.expect("analyze").record;
    // round(60*0.4 + 10*0.6) = 30
    assert_eq!(r.final_result.score, 30);
    assert_eq!(r.final_result.verdict, Verdict::Dudosa);
    assert_eq!(r.final_result.method, CombineMethod::Balanced);
}

#[tokio::test]
async fn failing_secondary_falls_back_to_primary() {
    let store: Arc<MemoryLog<AnalysisRecord>> = Arc::new(MemoryLog::new());
    let p = pipeline(Behaviour::Fail, store.clone());

    let r = p.analyze(item()).await.expect("analyze").record;
    assert_eq!(r.final_result.score, 60);
    assert_eq!(r.final_result.verdict, Verdict::Dudosa);
    assert_eq!(r.final_result.method, CombineMethod::PrimaryOnlyFallback);
    assert!((r.final_result.confidence - 0.6).abs() < 1e-9);

    let ml = r.ml.expect("placeholder block");
    assert_eq!(ml.ml_verdict, "error");
    assert_eq!(ml.ml_score, 60.0);
    assert_eq!(ml.ml_confidence, 0.5);
}

#[tokio::test]
async fn slow_secondary_times_out_and_falls_back() {
    let store: Arc<MemoryLog<AnalysisRecord>> = Arc::new(MemoryLog::new());
    let p = pipeline(Behaviour::Hang(Duration::from_secs(5)), store);

    let started = std::time::Instant::now();
    let r = p.analyze(item()).await.expect("analyze").record;
    assert!(started.elapsed() < Duration::from_secs(2), "timeout must bound the call");
    assert_eq!(r.final_result.method, CombineMethod::PrimaryOnlyFallback);
    assert_eq!(r.final_result.score, 60);
}

/// Serve `status` with a fixed body on an ephemeral port; returns the scorer URL.
async fn scorer_answering(status: axum::http::StatusCode, body: &'static str) -> String {
    use axum::{routing::post, Router};

    let app = Router::new().route("/predict", post(move || async move { (status, body) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve") });
    format!("http://{addr}/predict")
}

async fn analyze_against(url: String) -> AnalysisRecord {
    let p = Pipeline::new(
        Arc::new(MockClassifier::new(DUDOSA_60)),
        Some(Arc::new(HttpSecondaryScorer::new(url))),
        Arc::new(MemoryLog::<AnalysisRecord>::new()),
        PipelineSettings::default(),
    );
    p.analyze(item()).await.expect("analyze").record
}

#[tokio::test]
async fn http_scorer_error_status_falls_back_to_primary() {
    let url = scorer_answering(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let r = analyze_against(url).await;
    assert_eq!(r.final_result.method, CombineMethod::PrimaryOnlyFallback);
    assert_eq!(r.final_result.score, 60);
    assert_eq!(r.ml.expect("placeholder block").ml_verdict, "error");
}

#[tokio::test]
async fn http_scorer_malformed_body_falls_back_to_primary() {
    let url = scorer_answering(axum::http::StatusCode::OK, r#"{"ml_score": "alto"}"#).await;
    let r = analyze_against(url).await;
    assert_eq!(r.final_result.method, CombineMethod::PrimaryOnlyFallback);
    assert_eq!(r.final_result.verdict, Verdict::Dudosa);
    assert_eq!(r.ml.expect("placeholder block").ml_verdict, "error");
}

#[tokio::test]
async fn records_survive_on_disk_in_order() {
    let mut dir = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.push(format!("triage_pipeline_{nanos}"));
    let path = dir.join("data.json");

    let store: Arc<JsonFileLog<AnalysisRecord>> = Arc::new(JsonFileLog::new(&path));
    let p = pipeline(Behaviour::Fail, store.clone());
    let first = p.analyze(item()).await.expect("first").record;
    let second = p.analyze(item()).await.expect("second").record;
    assert!(second.id > first.id);

    // Fresh handle over the same file sees both, in order.
    let reopened: JsonFileLog<AnalysisRecord> = JsonFileLog::new(&path);
    let all = reopened.read_all().await.expect("read");
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    assert_eq!(all[1].item.title, second.item.title);
    assert_eq!(all[1].final_result, second.final_result);

    let _ = std::fs::remove_dir_all(&dir);
}
