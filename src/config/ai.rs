// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_enabled() -> bool {
    true
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// "gemini" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GOOGLE_API_KEY, then GEMINI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClassifierConfig {
    /// Normalize the provider and resolve an `"ENV"` key.
    /// A missing key is only an error when the real provider will be used.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let from_env = match self.provider.as_str() {
                "gemini" => env::var("GOOGLE_API_KEY")
                    .or_else(|_| env::var("GEMINI_API_KEY"))
                    .ok(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
            let mock = env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false);
            self.api_key = match from_env {
                Some(k) => k,
                None if self.enabled && !mock => {
                    anyhow::bail!("Missing GOOGLE_API_KEY (or GEMINI_API_KEY) env var")
                }
                None => String::new(),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }

        Ok(self)
    }
}
