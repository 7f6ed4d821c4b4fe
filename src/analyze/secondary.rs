//! Secondary scorer client (separately deployed ML model).
//!
//! Single attempt, bounded timeout, no retries. Any failure is returned as an
//! error; the pipeline turns it into the primary-only fallback.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::record::SecondaryBlock;

/// Payload sent to the scorer.
#[derive(Debug, Clone, Serialize)]
pub struct SecondaryRequest {
    pub title: String,
    pub body: String,
    pub source: String,
    pub primary_score: u8,
    pub primary_verdict: String,
}

#[async_trait]
pub trait SecondaryScorer: Send + Sync {
    async fn score(&self, req: &SecondaryRequest) -> Result<SecondaryBlock>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct HttpSecondaryScorer {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpSecondaryScorer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SecondaryScorer for HttpSecondaryScorer {
    async fn score(&self, req: &SecondaryRequest) -> Result<SecondaryBlock> {
        let rsp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .context("secondary scorer request failed")?;
        let rsp = rsp
            .error_for_status()
            .map_err(|e| anyhow!("secondary scorer HTTP error: {e}"))?;
        let block: SecondaryBlock = rsp
            .json()
            .await
            .context("secondary scorer response unreadable")?;
        validate(block)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Reject non-finite numbers, clamp score to [0,100] and confidence to [0,1].
pub fn validate(mut block: SecondaryBlock) -> Result<SecondaryBlock> {
    if !block.ml_score.is_finite() || !block.ml_confidence.is_finite() {
        return Err(anyhow!("secondary scorer returned non-finite values"));
    }
    block.ml_score = block.ml_score.clamp(0.0, 100.0);
    block.ml_confidence = block.ml_confidence.clamp(0.0, 1.0);
    Ok(block)
}
