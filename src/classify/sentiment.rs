//! Optional model-backed signal.
//!
//! A [`ModelBackend`] labels text with one of a set of candidate categories
//! (zero-shot classification). [`SentimentAdapter`] wraps an optional backend
//! and turns its answer into a single `ai` signal. Missing backends and
//! backend failures both produce no signal.

use super::SignalSource;
use crate::config::CategorizationConfig;
use crate::error::{Result, ShelfError};
use crate::model::{CategoryResult, SignalMethod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pluggable text-classification backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend finished initialization and can take requests.
    fn is_ready(&self) -> bool {
        true
    }

    /// Best label among `labels` with its score, or `None` when undecided.
    ///
    /// # Errors
    ///
    /// Transport or decoding failures.
    async fn classify(&self, text: &str, labels: &[String]) -> Result<Option<(String, f64)>>;
}

#[derive(Debug, Serialize)]
struct ZeroShotRequest<'a> {
    inputs: &'a str,
    parameters: ZeroShotParameters<'a>,
}

#[derive(Debug, Serialize)]
struct ZeroShotParameters<'a> {
    candidate_labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ZeroShotResponse {
    labels: Vec<String>,
    scores: Vec<f64>,
}

/// Zero-shot classification over HTTP, in the request/response shape used by
/// hosted inference endpoints (`inputs` + `candidate_labels` in,
/// parallel `labels`/`scores` out).
pub struct HttpModelBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpModelBackend {
    /// # Errors
    ///
    /// Returns `Classification` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShelfError::Classification {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Backend described by the config, when one is enabled.
    ///
    /// # Errors
    ///
    /// Returns `Classification` if the HTTP client cannot be built.
    pub fn from_config(config: &CategorizationConfig) -> Result<Option<Self>> {
        match (&config.model_endpoint, config.ai_enabled) {
            (Some(endpoint), true) => Ok(Some(Self::new(
                endpoint.clone(),
                config.model_token.clone(),
                Duration::from_secs(config.model_timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn classify(&self, text: &str, labels: &[String]) -> Result<Option<(String, f64)>> {
        let body = ZeroShotRequest {
            inputs: text,
            parameters: ZeroShotParameters {
                candidate_labels: labels,
            },
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ShelfError::Classification {
            reason: format!("request failed: {e}"),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ShelfError::Classification {
                reason: format!("backend returned HTTP {status}"),
            });
        }
        let parsed: ZeroShotResponse =
            response.json().await.map_err(|e| ShelfError::Classification {
                reason: format!("invalid response: {e}"),
            })?;

        Ok(parsed
            .labels
            .into_iter()
            .zip(parsed.scores)
            .max_by(|a, b| a.1.total_cmp(&b.1)))
    }
}

/// Wraps an optional backend as a signal source.
pub struct SentimentAdapter {
    backend: Option<Arc<dyn ModelBackend>>,
    labels: Vec<String>,
}

impl SentimentAdapter {
    #[must_use]
    pub fn new(backend: Arc<dyn ModelBackend>, labels: Vec<String>) -> Self {
        Self {
            backend: Some(backend),
            labels,
        }
    }

    /// An adapter that never contributes.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            backend: None,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_ready()) && !self.labels.is_empty()
    }
}

#[async_trait]
impl SignalSource for SentimentAdapter {
    fn method(&self) -> SignalMethod {
        SignalMethod::Ai
    }

    async fn signals(&self, text: &str) -> Vec<CategoryResult> {
        let Some(backend) = self.backend.as_ref().filter(|b| b.is_ready()) else {
            return Vec::new();
        };
        if text.trim().is_empty() || self.labels.is_empty() {
            return Vec::new();
        }

        match backend.classify(text, &self.labels).await {
            Ok(Some((label, score))) => {
                debug!(backend = backend.name(), label = %label, score, "Model signal");
                vec![
                    CategoryResult::signal(label, score.clamp(0.0, 1.0), SignalMethod::Ai)
                        .with_detail("model", backend.name()),
                ]
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Model backend failed; skipping signal");
                Vec::new()
            }
        }
    }
}
