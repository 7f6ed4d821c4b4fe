//! Primary classifier: provider abstraction, prompt construction and the
//! parse-with-defaults step that turns any LLM reply into a full `Classification`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::ai::ClassifierConfig;
use crate::record::{AnalysisRecord, Checks, Classification, Evidence, NewsItem, Verdict};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

pub const DEFAULT_SCORE: u8 = 50;
pub const DEFAULT_VERDICT: Verdict = Verdict::Dudosa;
pub const DEFAULT_RATIONALE: &str = "Sin explicación";
pub const MAX_EVIDENCE: usize = 3;

/// Trait object used by the pipeline (and stubbed in tests).
pub trait ClassifierClient: Send + Sync {
    /// Send the prompt; `None` when the service could not be reached or answered non-2xx.
    fn classify<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
    /// Model identifier recorded on each analysis.
    fn model_name(&self) -> &str;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn ClassifierClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a mock client with a canned JSON reply.
/// * Else if `config.enabled == false`, returns a disabled client.
/// * Else builds the configured provider.
pub fn build_classifier(config: &ClassifierConfig) -> anyhow::Result<DynClassifier> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockClassifier::canned()));
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledClient));
    }

    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        other => anyhow::bail!("Unsupported classifier provider: {other}"),
    }
}

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// Google Gemini (`generateContent` REST API).
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("veracity-triage/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building classifier HTTP client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ClassifierClient for GeminiProvider {
    fn classify<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                warn!("classifier API key missing; skipping call");
                return None;
            }

            #[derive(Serialize)]
            struct Part<'a> {
                text: &'a str,
            }
            #[derive(Serialize)]
            struct Content<'a> {
                role: &'a str,
                parts: Vec<Part<'a>>,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                contents: Vec<Content<'a>>,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: Option<CandidateContent>,
            }
            #[derive(Deserialize)]
            struct CandidateContent {
                #[serde(default)]
                parts: Vec<RespPart>,
            }
            #[derive(Deserialize)]
            struct RespPart {
                #[serde(default)]
                text: String,
            }

            let req = Req {
                contents: vec![Content {
                    role: "user",
                    parts: vec![Part { text: prompt }],
                }],
            };
            let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

            let resp = match self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&req)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "classifier request failed");
                    return None;
                }
            };
            if !resp.status().is_success() {
                warn!(status = %resp.status(), "classifier returned non-success status");
                return None;
            }
            let body: Resp = match resp.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "classifier envelope unreadable");
                    return None;
                }
            };
            // An empty text is still a reply; parse-with-defaults handles it.
            let text = body
                .candidates
                .first()
                .and_then(|c| c.content.as_ref())
                .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
                .unwrap_or_default();
            Some(text)
        })
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

/// Returns `None` always; used when the classifier is disabled.
pub struct DisabledClient;

impl ClassifierClient for DisabledClient {
    fn classify<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed reply for tests/local runs.
#[derive(Clone)]
pub struct MockClassifier {
    pub reply: String,
}

impl MockClassifier {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    /// Neutral, well-formed reply wrapped in prose, like real LLM output tends to be.
    pub fn canned() -> Self {
        Self::new(
            "Aquí está el análisis:\n```json\n{\"score\": 55, \"verdict\": \"dudosa\", \
             \"rationale\": \"Respuesta simulada.\", \"labels\": [\"neutral\"], \
             \"evidence\": [], \"checks\": {\"fecha_coherente\": null, \
             \"fuente_identificable\": null, \"consenso_en_fuentes\": null}}\n```",
        )
    }
}

impl ClassifierClient for MockClassifier {
    fn classify<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        let out = self.reply.clone();
        Box::pin(async move { Some(out) })
    }
    fn model_name(&self) -> &str {
        "mock"
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Prompt
// ------------------------------------------------------------

/// Candidate item plus up to `examples.len()` previously classified items for in-context guidance.
pub fn build_prompt(item: &NewsItem, examples: &[AnalysisRecord]) -> String {
    let shots = examples
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. ({}) {}", i + 1, r.final_result.verdict, r.item.title))
        .collect::<Vec<_>>()
        .join("\n");
    let shots = if shots.is_empty() {
        "(sin ejemplos previos)".to_string()
    } else {
        shots
    };

    format!(
        "Actúa como verificador profesional de noticias locales.\n\
         Ejemplos recientes ya clasificados:\n\
         {shots}\n\n\
         Clasifica la noticia siguiente como real, falsa, no_noticia o dudosa, asigna un \
         puntaje de credibilidad de 0 a 100 y justifica brevemente.\n\
         Responde únicamente con un objeto JSON con esta forma:\n\
         {{\"score\": 0-100, \"verdict\": \"real\"|\"falsa\"|\"no_noticia\"|\"dudosa\", \
         \"rationale\": \"máximo dos líneas\", \
         \"labels\": [\"clickbait\"|\"sin_fuente\"|\"contradice_fuentes\"|\"sesgada\"|\
         \"descontextualizada\"|\"rumor\"|\"satira\"|\"neutral\"], \
         \"evidence\": [{{\"claim\": \"...\", \"assessment\": \"soporta\"|\"refuta\"|\"incierto\", \
         \"sources\": [\"https://...\"]}}], \
         \"checks\": {{\"fecha_coherente\": true|false, \"fuente_identificable\": true|false, \
         \"consenso_en_fuentes\": true|false}}}}\n\n\
         Noticia:\n\
         - Título: {title}\n\
         - Fuente: {source}\n\
         - Cuerpo: {body}",
        title = item.title,
        source = item.source,
        body = item.body,
    )
}

// ------------------------------------------------------------
// Parse-with-defaults
// ------------------------------------------------------------

/// Result of parsing a classifier reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub classification: Classification,
    /// `false` when no JSON object could be extracted and every field is a default.
    pub well_formed: bool,
}

/// Total function: any text -> fully populated `Classification`.
///
/// Tries the whole reply as JSON, then the span between the first `{` and the
/// last `}`. Missing or mistyped fields fall back to documented defaults.
pub fn parse_classification(raw: &str) -> ParsedReply {
    let (obj, well_formed) = match extract_object(raw) {
        Some(o) => (o, true),
        None => (Map::new(), false),
    };

    let score = obj
        .get("score")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
        .map(|s| s.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(DEFAULT_SCORE);

    let verdict = obj
        .get("verdict")
        .and_then(Value::as_str)
        .and_then(Verdict::from_label)
        .unwrap_or(DEFAULT_VERDICT);

    let labels = obj
        .get("labels")
        .and_then(Value::as_array)
        .map(|xs| {
            xs.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let rationale = obj
        .get("rationale")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_RATIONALE)
        .to_string();

    let evidence = obj
        .get("evidence")
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(parse_evidence).take(MAX_EVIDENCE).collect())
        .unwrap_or_default();

    let checks = obj
        .get("checks")
        .and_then(Value::as_object)
        .map(|c| Checks {
            fecha_coherente: c.get("fecha_coherente").and_then(Value::as_bool),
            fuente_identificable: c.get("fuente_identificable").and_then(Value::as_bool),
            consenso_en_fuentes: c.get("consenso_en_fuentes").and_then(Value::as_bool),
        })
        .unwrap_or_default();

    ParsedReply {
        classification: Classification {
            score,
            verdict,
            labels,
            rationale,
            evidence,
            checks,
        },
        well_formed,
    }
}

fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let text = raw.trim();
    if let Ok(Value::Object(o)) = serde_json::from_str::<Value>(text) {
        return Some(o);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(o)) => Some(o),
        _ => None,
    }
}

fn parse_evidence(v: &Value) -> Option<Evidence> {
    let o = v.as_object()?;
    let claim = o.get("claim").and_then(Value::as_str)?.trim().to_string();
    let assessment = o
        .get("assessment")
        .and_then(Value::as_str)
        .unwrap_or("incierto")
        .to_string();
    let sources = o
        .get("sources")
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    Some(Evidence {
        claim,
        assessment,
        sources,
    })
}
