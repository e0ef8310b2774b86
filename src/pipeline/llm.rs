//! Vision-model interaction: the backend seam and the Ollama HTTP client.
//!
//! [`VisionBackend`] is the one trait the pipeline talks to. The production
//! implementation is [`OllamaClient`]; tests and embedders can pass their own
//! through [`crate::config::OcrConfigBuilder::backend`].
//!
//! ## Retry Strategy
//!
//! The client sends exactly one request per call. Retries live in
//! [`infer_with_retry`], which repeats only the request (never the decode)
//! with exponential backoff `retry_backoff_ms * 2^(attempt-1)`: with 500 ms
//! base and 3 retries the wait sequence is 500 ms → 1 s → 2 s.

use crate::config::OcrConfig;
use crate::error::{InferenceError, ItemError, OcrError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Longest slice of an error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Something that turns an image plus an instruction into text.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Send one request. `image_b64` is a base64 PNG without data-URI prefix.
    async fn generate(&self, prompt: &str, image_b64: String) -> Result<String, InferenceError>;
}

// ── Ollama ───────────────────────────────────────────────────────────────

/// Client for an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    images: [String; 1],
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct RunningModels {
    #[serde(default)]
    models: Vec<RunningModel>,
}

#[derive(Deserialize)]
struct RunningModel {
    name: String,
}

impl OllamaClient {
    /// Build a client for `endpoint` (scheme included, no trailing slash).
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, OcrError> {
        let endpoint = endpoint.into();
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().map_err(|e| OcrError::ClientInit {
            endpoint: endpoint.clone(),
            detail: e.to_string(),
        })?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }

    /// Build a client from the endpoint, model and timeout in `config`.
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        Self::new(
            config.resolved_endpoint(),
            config.model.clone(),
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models the server currently holds in memory (`GET /api/ps`).
    pub async fn running_models(&self) -> Result<Vec<String>, InferenceError> {
        let response = self
            .client
            .get(format!("{}/api/ps", self.endpoint))
            .send()
            .await
            .map_err(|e| InferenceError::unreachable(describe_send_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::status(status.as_u16(), truncate(&body)));
        }

        let listing: RunningModels = response
            .json()
            .await
            .map_err(|e| InferenceError::unreachable(format!("invalid /api/ps reply: {e}")))?;

        Ok(listing.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl VisionBackend for OllamaClient {
    async fn generate(&self, prompt: &str, image_b64: String) -> Result<String, InferenceError> {
        let start = Instant::now();
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            images: [image_b64],
        };

        debug!(model = %self.model, endpoint = %self.endpoint, "Sending generate request");

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::unreachable(describe_send_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::status(
                status.as_u16(),
                format!("endpoint returned {status}: {}", truncate(&body)),
            ));
        }

        let reply: GenerateResponse = response.json().await.map_err(|e| {
            InferenceError::status(status.as_u16(), format!("reply has no 'response' text: {e}"))
        })?;

        debug!(
            "Generate reply: {} bytes in {:?}",
            reply.response.len(),
            start.elapsed()
        );
        Ok(reply.response)
    }
}

fn describe_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("endpoint unreachable: {e}")
    } else {
        e.to_string()
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Run one inference for `path`, retrying per `config`.
///
/// The image is already encoded; each retry resends the same payload.
pub async fn infer_with_retry(
    backend: &Arc<dyn VisionBackend>,
    path: &Path,
    prompt: &str,
    image_b64: &str,
    config: &OcrConfig,
) -> Result<String, ItemError> {
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "'{}': retry {}/{} after {}ms",
                path.display(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match backend.generate(prompt, image_b64.to_string()).await {
            Ok(text) => return Ok(text),
            Err(e) => {
                let err = ItemError::inference(path, e);
                if attempt >= config.max_retries || !err.is_retryable() {
                    return Err(err);
                }
                warn!("'{}': attempt {} failed: {}", path.display(), attempt + 1, err);
            }
        }
        attempt += 1;
    }
}
