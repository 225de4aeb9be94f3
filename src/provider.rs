//! Provider adapter: a single `score_claim` operation returning a
//! validated sample payload. Retries once on invalid JSON with small jitter;
//! otherwise returns an empty payload with `json_valid=false`. Bounded
//! transport retries surface `ProviderUnavailable` only after exhaustion.

use crate::error::{LogitProbeError, Result};
use crate::types::ProviderCallResult;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

pub struct ProviderRequest<'a> {
    pub instructions: &'a str,
    pub user_text: &'a str,
    pub max_output_tokens: u32,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn score_claim(&self, req: ProviderRequest<'_>) -> Result<ProviderCallResult>;
}

/// Live HTTP provider. Contract: exactly one logical call per invocation
/// from the orchestrator's point of view; internally this may perform one
/// schema retry plus a bounded transport retry budget, mirroring the
/// backoff loop this codebase already uses for embedding calls.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    transport_retry_budget: u32,
}

impl HttpProvider {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        timeout_ms: u64,
        transport_retry_budget: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| LogitProbeError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            transport_retry_budget,
        })
    }

    async fn call_once(&self, req: &ProviderRequest<'_>) -> Result<(reqwest::StatusCode, String)> {
        let body = serde_json::json!({
            "model": self.model,
            "system": req.instructions,
            "user": req.user_text,
            "max_output_tokens": req.max_output_tokens,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn score_claim(&self, req: ProviderRequest<'_>) -> Result<ProviderCallResult> {
        let mut last_err: Option<LogitProbeError> = None;

        for attempt in 0..self.transport_retry_budget {
            let started = Instant::now();
            match self.call_once(&req).await {
                Ok((status, text)) if status.is_success() => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    return Ok(parse_or_retry_once(self, &req, text, latency_ms).await);
                }
                Ok((status, text)) => {
                    last_err = Some(LogitProbeError::ProviderUnavailable {
                        message: format!("provider returned {status}: {text}"),
                    });
                }
                Err(e) => last_err = Some(e),
            }
            let delay_ms = 200u64 * (1u64 << attempt.min(5));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        Err(last_err.unwrap_or(LogitProbeError::ProviderUnavailable {
            message: "transport retry budget exhausted".to_string(),
        }))
    }
}

/// Separate from `score_claim` so the one schema-level retry (on invalid
/// JSON) is distinct from the transport-level retry loop above it.
async fn parse_or_retry_once(
    provider: &HttpProvider,
    req: &ProviderRequest<'_>,
    first_text: String,
    first_latency_ms: u64,
) -> ProviderCallResult {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&first_text) {
        return ProviderCallResult {
            raw_json: Some(value),
            provider_model_id: provider.model.clone(),
            response_id: response_id_for(&first_text),
            latency_ms: first_latency_ms,
            json_valid: true,
        };
    }

    tokio::time::sleep(Duration::from_millis(50 + (first_latency_ms % 100))).await;

    match provider.call_once(req).await {
        Ok((status, text)) if status.is_success() => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                return ProviderCallResult {
                    raw_json: Some(value),
                    provider_model_id: provider.model.clone(),
                    response_id: response_id_for(&text),
                    latency_ms: first_latency_ms,
                    json_valid: true,
                };
            }
            empty_invalid_result(&provider.model, first_latency_ms)
        }
        _ => empty_invalid_result(&provider.model, first_latency_ms),
    }
}

fn empty_invalid_result(model: &str, latency_ms: u64) -> ProviderCallResult {
    ProviderCallResult {
        raw_json: None,
        provider_model_id: model.to_string(),
        response_id: String::new(),
        latency_ms,
        json_valid: false,
    }
}

fn response_id_for(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[0..8])
}

/// Deterministic stub provider selected by `config.mock`. Derives a
/// reproducible `prob_true` from a hash of the composed prompt text, so
/// tests and the documented scenarios run without network access.
pub struct MockProvider {
    pub model_id: String,
    /// When set, every call returns this literal payload instead of a
    /// hash-derived one (used to script compliance-exclusion and
    /// boundary-probability test scenarios).
    pub scripted_prob_true: Option<f64>,
    /// When true, the scripted response embeds a URL marker, exercising the
    /// compliance filter's rejection path.
    pub inject_url: bool,
}

impl MockProvider {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            scripted_prob_true: None,
            inject_url: false,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn score_claim(&self, req: ProviderRequest<'_>) -> Result<ProviderCallResult> {
        let prob_true = self.scripted_prob_true.unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(req.instructions.as_bytes());
            hasher.update(req.user_text.as_bytes());
            let digest = hasher.finalize();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[0..8]);
            (u64::from_be_bytes(bytes) as f64 / u64::MAX as f64).clamp(0.0, 1.0)
        });

        let mut payload = serde_json::json!({ "prob_true": prob_true });
        if self.inject_url {
            payload["rationale"] = serde_json::json!("see https://example.com/source");
        }

        Ok(ProviderCallResult {
            raw_json: Some(payload),
            provider_model_id: self.model_id.clone(),
            response_id: response_id_for(req.user_text),
            latency_ms: 1,
            json_valid: true,
        })
    }
}
