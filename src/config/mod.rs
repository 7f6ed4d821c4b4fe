//! Service configuration: `config/triage.toml` plus environment overrides.
//!
//! A missing file means defaults; a malformed file is a startup error.

pub mod ai;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::CalibrationPolicy;
use crate::engine::CombinePolicy;
use ai::ClassifierConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/triage.toml";
pub const ENV_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_SECONDARY_URL: &str = "SECONDARY_URL";

/// `[secondary]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    pub enabled: bool,
    pub url: String,
    /// Upper bound for the whole secondary call; on expiry the scorer counts as unavailable.
    pub timeout_ms: u64,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://127.0.0.1:5000/predict".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// `[history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Recent analyses embedded in the classifier prompt.
    pub prompt_examples: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { prompt_examples: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub classifier: ClassifierConfig,
    pub secondary: SecondaryConfig,
    pub combine: CombinePolicy,
    pub calibration: CalibrationPolicy,
    pub history: HistoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            classifier: ClassifierConfig::default(),
            secondary: SecondaryConfig::default(),
            combine: CombinePolicy::default(),
            calibration: CalibrationPolicy::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `TRIAGE_CONFIG_PATH` (or the default path), then apply env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        cfg.finish()
    }

    /// Parse TOML without env overrides or key resolution.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn finish(mut self) -> anyhow::Result<Self> {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var(ENV_SECONDARY_URL) {
            if !url.trim().is_empty() {
                self.secondary.url = url;
                self.secondary.enabled = true;
            }
        }
        if self.secondary.timeout_ms == 0 {
            self.secondary.timeout_ms = SecondaryConfig::default().timeout_ms;
        }
        self.combine = self.combine.sanitized();
        self.calibration = self.calibration.sanitized();
        self.classifier = self.classifier.resolve()?;

        info!(
            data_dir = %self.data_dir.display(),
            provider = %self.classifier.provider,
            classifier_enabled = self.classifier.enabled,
            key_len = self.classifier.api_key.len(),
            secondary_enabled = self.secondary.enabled,
            "config loaded"
        );
        Ok(self)
    }

    pub fn analyses_path(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }
    pub fn reference_path(&self) -> PathBuf {
        self.data_dir.join("dataset.json")
    }
    pub fn feedback_path(&self) -> PathBuf {
        self.data_dir.join("feedback.json")
    }
    pub fn calibration_log_path(&self) -> PathBuf {
        self.data_dir.join("calibration_log.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::parse(
            r#"
            data_dir = "/var/lib/triage"

            [combine]
            confidence_gate = 0.8

            [calibration]
            recent_window = 20
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/triage"));
        assert_eq!(cfg.combine.confidence_gate, 0.8);
        assert_eq!(cfg.combine.primary_weight, 0.4);
        assert_eq!(cfg.calibration.recent_window, 20);
        assert_eq!(cfg.calibration.similarity_threshold, 0.6);
        assert_eq!(cfg.history.prompt_examples, 10);
        assert_eq!(cfg.classifier.model, "gemini-2.5-flash");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(AppConfig::parse("data_dir = [").is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_and_policies_are_sanitized() {
        std::env::set_var(ENV_DATA_DIR, "/tmp/triage-env");
        std::env::set_var(ENV_SECONDARY_URL, "http://scorer:5000/predict");
        std::env::set_var("AI_TEST_MODE", "mock");

        let mut cfg = AppConfig::default();
        cfg.combine.confidence_gate = 7.0;
        let cfg = cfg.finish().unwrap();

        std::env::remove_var(ENV_DATA_DIR);
        std::env::remove_var(ENV_SECONDARY_URL);
        std::env::remove_var("AI_TEST_MODE");

        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/triage-env"));
        assert!(cfg.secondary.enabled);
        assert_eq!(cfg.secondary.url, "http://scorer:5000/predict");
        assert_eq!(cfg.combine.confidence_gate, 0.7);
        assert_eq!(cfg.analyses_path(), PathBuf::from("/tmp/triage-env/data.json"));
    }
}
