// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod dataset;
pub mod history;
pub mod metrics;
pub mod record;

// Scoring core: matcher, label table, calibration, combiner, explanations
pub mod calibration;
pub mod engine;
pub mod explain;
pub mod labels;
pub mod similarity;

// Request pipeline (primary classifier, secondary scorer)
pub mod analyze;

// Read-side views
pub mod export;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::{router, AppState, Stores};

use axum::Router;
use tracing::info;

/// Load `AppConfig`, wire file-backed state and build the full router.
/// Call after tracing init so config loading is logged.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = config::AppConfig::load()?;
    let state = AppState::from_config(&cfg).await?;
    info!(data_dir = %cfg.data_dir.display(), "router ready");
    Ok(router(state))
}
