use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info};

use crate::analyze::ai_adapter::build_classifier;
use crate::analyze::secondary::HttpSecondaryScorer;
use crate::analyze::{AnalyzeError, Pipeline, PipelineSettings, SecondaryScorer};
use crate::calibration::{calibrate as run_calibration, CalibrationPolicy};
use crate::config::AppConfig;
use crate::dataset::{parse_dataset, DatasetError};
use crate::export::to_csv;
use crate::history::{AppendLog, JsonFileLog, MemoryLog, StoreError};
use crate::metrics::Metrics;
use crate::record::{
    de_lenient_score, next_id, AnalysisRecord, CalibrationLogEntry, CalibrationResult,
    Classification, Explanation, FeedbackKind, FeedbackRecord, FinalResult, NewsItem,
    ReferenceArticle, SecondaryBlock, Verdict,
};
use crate::stats::{filter, kpis, newest_first, Kpis};

pub const HISTORY_DEFAULT_LIMIT: usize = 100;
pub const HISTORY_MAX_LIMIT: usize = 1000;
pub const CALIBRATION_LOGS_SHOWN: usize = 10;
pub const DATASET_MAX_BYTES: usize = 10 * 1024 * 1024;
const FRONTEND_DIR: &str = "frontend";

/// The four append-only logs behind the service.
#[derive(Clone)]
pub struct Stores {
    pub analyses: Arc<dyn AppendLog<AnalysisRecord>>,
    pub reference: Arc<dyn AppendLog<ReferenceArticle>>,
    pub feedback: Arc<dyn AppendLog<FeedbackRecord>>,
    pub calibration_log: Arc<dyn AppendLog<CalibrationLogEntry>>,
}

impl Stores {
    /// JSON array files under the configured data dir.
    pub fn json_files(cfg: &AppConfig) -> Self {
        Self {
            analyses: Arc::new(JsonFileLog::new(cfg.analyses_path())),
            reference: Arc::new(JsonFileLog::new(cfg.reference_path())),
            feedback: Arc::new(JsonFileLog::new(cfg.feedback_path())),
            calibration_log: Arc::new(JsonFileLog::new(cfg.calibration_log_path())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            analyses: Arc::new(MemoryLog::new()),
            reference: Arc::new(MemoryLog::new()),
            feedback: Arc::new(MemoryLog::new()),
            calibration_log: Arc::new(MemoryLog::new()),
        }
    }

    /// Keep new ids above every id already persisted in the analysis and feedback logs.
    pub async fn seed_ids(&self) -> Result<i64, StoreError> {
        let analyses = self.analyses.read_all().await?;
        let feedback = self.feedback.read_all().await?;
        let floor = analyses
            .iter()
            .map(|a| a.id)
            .chain(feedback.iter().map(|f| f.id))
            .max()
            .unwrap_or(0);
        crate::record::seed_ids(floor);
        Ok(floor)
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    stores: Stores,
    calibration: CalibrationPolicy,
    metrics: Option<Metrics>,
    started: Instant,
}

impl AppState {
    pub fn new(pipeline: Pipeline, stores: Stores, calibration: CalibrationPolicy) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            stores,
            calibration,
            metrics: None,
            started: Instant::now(),
        }
    }

    /// Mount `/metrics` on the router built from this state.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire classifier, secondary scorer, file-backed stores and the metrics recorder.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let classifier = build_classifier(&cfg.classifier)?;
        let timeout = Duration::from_millis(cfg.secondary.timeout_ms);
        let secondary: Option<Arc<dyn SecondaryScorer>> = if cfg.secondary.enabled {
            Some(Arc::new(
                HttpSecondaryScorer::new(cfg.secondary.url.clone()).with_timeout(timeout),
            ))
        } else {
            None
        };
        let stores = Stores::json_files(cfg);
        let floor = stores.seed_ids().await?;
        info!(floor, "id sequence seeded from stored records");
        let settings = PipelineSettings {
            combine: cfg.combine,
            secondary_timeout: timeout,
            prompt_examples: cfg.history.prompt_examples,
        };
        let pipeline = Pipeline::new(classifier, secondary, stores.analyses.clone(), settings);
        Ok(Self::new(pipeline, stores, cfg.calibration).with_metrics(Metrics::init()?))
    }
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/history", get(history))
        .route("/stats", get(stats))
        .route("/export/csv", get(export_csv))
        .route("/feedback", post(feedback))
        .route("/reference", get(reference_summary).post(upload_reference))
        .route(
            "/upload-dataset",
            post(upload_dataset).layer(DefaultBodyLimit::max(DATASET_MAX_BYTES)),
        )
        .route("/calibrate", post(calibrate))
        .route("/calibration-logs", get(calibration_logs))
        .fallback(not_found)
        .with_state(state);

    if let Some(m) = metrics {
        app = app.merge(m.router());
    }
    if Path::new(FRONTEND_DIR).is_dir() {
        app = app.nest_service("/ui", ServeDir::new(FRONTEND_DIR));
    }
    app.layer(CorsLayer::very_permissive())
}

// ---------- errors ----------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl From<JsonRejection> for ApiError {
    fn from(rej: JsonRejection) -> Self {
        ApiError::BadRequest(rej.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rej: MultipartRejection) -> Self {
        ApiError::BadRequest(rej.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::Dataset(_)
            | ApiError::Analyze(AnalyzeError::EmptyInput) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Analyze(AnalyzeError::ClassifierUnavailable) => StatusCode::BAD_GATEWAY,
            ApiError::Analyze(AnalyzeError::Storage(_)) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": "route not found" })),
    )
        .into_response()
}

// ---------- liveness ----------

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "veracity-triage" }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "uptime_secs": state.started.elapsed().as_secs() }))
}

// ---------- analyze ----------

#[derive(Serialize)]
struct AnalyzeResult {
    primary: Classification,
    secondary: Option<SecondaryBlock>,
    #[serde(rename = "final")]
    final_result: FinalResult,
    explanations: Explanation,
}

#[derive(Serialize)]
struct Saved {
    id: i64,
    latency_ms: u64,
}

#[derive(Serialize)]
struct AnalyzeResp {
    ok: bool,
    result: AnalyzeResult,
    saved: Saved,
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<NewsItem>, JsonRejection>,
) -> ApiResult<AnalyzeResp> {
    let Json(item) = payload?;
    let record = state.pipeline.analyze(item).await?.record;
    Ok(Json(AnalyzeResp {
        ok: true,
        saved: Saved {
            id: record.id,
            latency_ms: record.latency_ms,
        },
        result: AnalyzeResult {
            primary: record.primary,
            secondary: record.ml,
            final_result: record.final_result,
            explanations: record.explanations,
        },
    }))
}

// ---------- history / stats / export ----------

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    q: String,
    limit: Option<String>,
}

impl HistoryQuery {
    /// Missing, zero or non-numeric limits fall back to the default.
    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT)
    }
}

#[derive(Serialize)]
struct HistoryResp {
    ok: bool,
    items: Vec<AnalysisRecord>,
    total: usize,
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResp> {
    let all = state.stores.analyses.read_all().await?;
    let matched = filter(&all, &query.q);
    let total = matched.len();
    let items = newest_first(matched, query.limit()).into_iter().cloned().collect();
    Ok(Json(HistoryResp {
        ok: true,
        items,
        total,
    }))
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct StatsResp {
    ok: bool,
    #[serde(flatten)]
    kpis: Kpis,
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<StatsResp> {
    let all = state.stores.analyses.read_all().await?;
    Ok(Json(StatsResp {
        ok: true,
        kpis: kpis(&filter(&all, &query.q)),
    }))
}

async fn export_csv(State(state): State<AppState>) -> Result<Response, ApiError> {
    let all = state.stores.analyses.read_all().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"analyses.csv\"",
            ),
        ],
        to_csv(&all),
    )
        .into_response())
}

// ---------- feedback ----------

#[derive(Deserialize)]
struct FeedbackReq {
    analysis_id: i64,
    #[serde(deserialize_with = "de_lenient_score")]
    correct_score: f64,
    correct_verdict: String,
    #[serde(default)]
    user_feedback: Option<FeedbackKind>,
}

#[derive(Serialize)]
struct FeedbackResp {
    ok: bool,
    id: i64,
}

async fn feedback(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackReq>, JsonRejection>,
) -> ApiResult<FeedbackResp> {
    let Json(req) = payload?;
    if !(0.0..=100.0).contains(&req.correct_score) {
        return Err(ApiError::BadRequest(
            "correct_score must be between 0 and 100".into(),
        ));
    }
    let correct_verdict = Verdict::from_label(&req.correct_verdict).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown verdict: {:?}", req.correct_verdict))
    })?;

    let analyses = state.stores.analyses.read_all().await?;
    if !analyses.iter().any(|a| a.id == req.analysis_id) {
        return Err(ApiError::NotFound(format!(
            "analysis {} not found",
            req.analysis_id
        )));
    }

    let record = state
        .stores
        .feedback
        .append(FeedbackRecord {
            id: next_id(),
            analysis_id: req.analysis_id,
            correct_score: req.correct_score.round() as u8,
            correct_verdict,
            feedback_type: req.user_feedback.unwrap_or(FeedbackKind::UserCorrected),
            created_at: Utc::now(),
        })
        .await?;
    info!(id = record.id, analysis_id = record.analysis_id, kind = ?record.feedback_type, "feedback stored");
    Ok(Json(FeedbackResp {
        ok: true,
        id: record.id,
    }))
}

// ---------- reference corpus ----------

#[derive(Serialize)]
struct UploadResp {
    ok: bool,
    received: usize,
    added: usize,
    skipped_untitled: usize,
    skipped_duplicates: usize,
}

async fn upload_reference(
    State(state): State<AppState>,
    payload: Result<Json<Vec<ReferenceArticle>>, JsonRejection>,
) -> ApiResult<UploadResp> {
    let Json(incoming) = payload?;
    Ok(Json(merge_reference(&state.stores, incoming).await?))
}

/// Multipart upload of a `.csv` / `.xlsx` corpus; the first field carrying a file name is used.
async fn upload_dataset(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<UploadResp> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        let incoming = parse_dataset(&file_name, &bytes)?;
        info!(file = %file_name, bytes = bytes.len(), rows = incoming.len(), "dataset parsed");
        return Ok(Json(merge_reference(&state.stores, incoming).await?));
    }
    Err(ApiError::BadRequest("no file in upload".into()))
}

/// Append untitled-free, (title, source)-deduplicated articles to the reference log.
async fn merge_reference(
    stores: &Stores,
    incoming: Vec<ReferenceArticle>,
) -> Result<UploadResp, StoreError> {
    let received = incoming.len();

    let existing = stores.reference.read_all().await?;
    let mut seen: HashSet<(String, String)> = existing
        .into_iter()
        .map(|r| (r.title, r.source))
        .collect();

    let mut skipped_untitled = 0;
    let mut fresh = Vec::new();
    for article in incoming {
        if article.title.trim().is_empty() {
            skipped_untitled += 1;
            continue;
        }
        if seen.insert((article.title.clone(), article.source.clone())) {
            fresh.push(article);
        }
    }
    let skipped_duplicates = received - skipped_untitled - fresh.len();
    let added = stores.reference.append_all(fresh).await?;
    info!(received, added, skipped_untitled, skipped_duplicates, "reference corpus updated");

    Ok(UploadResp {
        ok: true,
        received,
        added,
        skipped_untitled,
        skipped_duplicates,
    })
}

#[derive(Serialize)]
struct ReferenceSummary {
    ok: bool,
    total: usize,
    labels: BTreeMap<String, usize>,
}

async fn reference_summary(State(state): State<AppState>) -> ApiResult<ReferenceSummary> {
    let corpus = state.stores.reference.read_all().await?;
    let mut labels = BTreeMap::new();
    for r in &corpus {
        let label = r.label.trim().to_lowercase();
        let key = if label.is_empty() {
            "sin_etiqueta".to_string()
        } else {
            label
        };
        *labels.entry(key).or_insert(0) += 1;
    }
    Ok(Json(ReferenceSummary {
        ok: true,
        total: corpus.len(),
        labels,
    }))
}

// ---------- calibration ----------

#[derive(Serialize)]
struct CalibrateResp {
    ok: bool,
    message: String,
    avg_accuracy: f64,
    calibration_rate: f64,
    total_analyses: usize,
    calibrated_analyses: usize,
    results: Vec<CalibrationResult>,
}

async fn calibrate(State(state): State<AppState>) -> ApiResult<CalibrateResp> {
    let analyses = state.stores.analyses.read_all().await?;
    let corpus = state.stores.reference.read_all().await?;
    let window = state.calibration.recent(&analyses);

    let entry = run_calibration(window, &corpus, &state.calibration, Utc::now());
    let entry = state.stores.calibration_log.append(entry).await?;

    counter!("triage_calibration_runs_total").increment(1);
    counter!("triage_calibration_matched_total").increment(entry.calibrated_analyses as u64);
    info!(
        considered = entry.total_analyses,
        matched = entry.calibrated_analyses,
        corpus = corpus.len(),
        avg_accuracy = entry.average_accuracy,
        "calibration run"
    );

    let message = if corpus.is_empty() {
        "Calibración completada sin corpus de referencia".to_string()
    } else {
        format!(
            "Calibración completada: {} de {} análisis con referencias",
            entry.calibrated_analyses, entry.total_analyses
        )
    };
    Ok(Json(CalibrateResp {
        ok: true,
        message,
        avg_accuracy: entry.average_accuracy,
        calibration_rate: entry.calibration_rate,
        total_analyses: entry.total_analyses,
        calibrated_analyses: entry.calibrated_analyses,
        results: entry.results,
    }))
}

#[derive(Serialize)]
struct CalibrationLogsResp {
    ok: bool,
    logs: Vec<CalibrationLogEntry>,
}

async fn calibration_logs(State(state): State<AppState>) -> ApiResult<CalibrationLogsResp> {
    let mut logs = state
        .stores
        .calibration_log
        .last_n(CALIBRATION_LOGS_SHOWN)
        .await?;
    logs.reverse();
    Ok(Json(CalibrationLogsResp { ok: true, logs }))
}
