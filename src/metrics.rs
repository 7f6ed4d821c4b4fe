use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the triage series.
    /// Later calls reuse the same handle.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| -> anyhow::Result<PrometheusHandle> {
            let handle = PrometheusBuilder::new().install_recorder()?;
            describe_counter!("triage_analyses_total", "Analyses stored.");
            describe_counter!(
                "triage_classifier_parse_fallback_total",
                "Classifier replies without an extractable JSON object."
            );
            describe_counter!(
                "triage_classifier_unavailable_total",
                "Requests failed because the primary classifier was unreachable."
            );
            describe_counter!(
                "triage_secondary_fallback_total",
                "Analyses that fell back to primary-only because the secondary scorer failed."
            );
            describe_histogram!(
                "triage_analysis_duration_ms",
                "End-to-end analysis latency in milliseconds."
            );
            describe_counter!("triage_calibration_runs_total", "Calibration runs.");
            describe_counter!(
                "triage_calibration_matched_total",
                "Analyses matched to reference articles across calibration runs."
            );
            Ok(handle)
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
