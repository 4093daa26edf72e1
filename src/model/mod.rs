//! Remote model invocation with provider adapters and retry/backoff.
//!
//! The provider is chosen once from configuration. Every attempt, including the ones whose
//! response later fails normalization or validation, spends one unit of the same budget.

mod gemini;
mod openai;
mod retry;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use retry::{Exhausted, RetryPolicy};

use crate::config::{ModelConfig, ModelProvider};
use crate::metrics::BatchMetrics;
use crate::processing::Granularity;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

const MAX_ERROR_BODY: usize = 500;

/// Provider-agnostic request for one record.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// User prompt containing the optimized text.
    pub prompt: String,
    /// System instruction sent separately where the provider supports it.
    pub system_instruction: Option<String>,
    /// Requested abstraction level.
    pub granularity: Granularity,
    /// Entity types offered to the model.
    pub entity_types: BTreeSet<String>,
}

/// Failure of a single attempt; always retryable.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Connection failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Provider answered with a non-success status.
    #[error("Provider returned {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// Response body did not carry text where the provider places it.
    #[error("Unexpected response envelope: {0}")]
    UnexpectedEnvelope(String),
    /// Model text could not be parsed as JSON.
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Parsed response broke the output contract.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors surfaced by [`ModelClient`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// Every attempt failed.
    #[error("Model call exhausted after {attempts} attempts: {last}")]
    CallExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: AttemptError,
    },
    /// HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Request construction and response extraction for one wire protocol.
pub trait ProviderAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Build the JSON body for `request`.
    fn build_payload(&self, request: &ExtractionRequest) -> Value;

    /// Pull the generated text out of a decoded response body.
    fn extract_output(&self, body: &Value) -> Option<String>;

    /// Attach credentials to an outgoing request.
    fn authorize(&self, builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder;
}

/// HTTP client bound to one provider and endpoint.
pub struct ModelClient {
    http: Client,
    adapter: Box<dyn ProviderAdapter>,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl ModelClient {
    /// Build a client from configuration, selecting the adapter once.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let adapter: Box<dyn ProviderAdapter> = match config.provider {
            ModelProvider::OpenAI => Box::new(OpenAiAdapter::new(
                config.model.clone(),
                config.temperature,
                config.max_output_tokens,
            )),
            ModelProvider::Gemini => Box::new(GeminiAdapter::new(
                config.temperature,
                config.max_output_tokens,
            )),
        };
        let http = Client::builder()
            .user_agent("corpus-triples/extract")
            .timeout(config.timeout)
            .build()
            .map_err(|error| ModelError::ClientBuild(error.to_string()))?;

        Ok(Self {
            http,
            adapter,
            url: config.full_url(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::new(config.max_retries, config.retry_base_delay),
        })
    }

    /// Retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Return raw model text, retrying transport and provider failures.
    pub async fn invoke(
        &self,
        request: &ExtractionRequest,
        metrics: &BatchMetrics,
    ) -> Result<String, ModelError> {
        self.invoke_validated(request, metrics, |raw| Ok(raw.to_string()))
            .await
    }

    /// Return the value produced by `accept`; its rejections consume the retry budget.
    pub async fn invoke_validated<T, F>(
        &self,
        request: &ExtractionRequest,
        metrics: &BatchMetrics,
        accept: F,
    ) -> Result<T, ModelError>
    where
        F: Fn(&str) -> Result<T, AttemptError>,
    {
        let max = self.retry.max_attempts();
        let accept = &accept;
        self.retry
            .run("model call", |attempt| {
                let call = metrics.next_call_number();
                async move {
                    tracing::info!(
                        call,
                        attempt,
                        provider = self.adapter.name(),
                        "[API #{call}] attempt {attempt}/{max}"
                    );
                    let raw = self.attempt(request).await?;
                    accept(&raw)
                }
            })
            .await
            .map_err(|exhausted| ModelError::CallExhausted {
                attempts: exhausted.attempts,
                last: exhausted.last,
            })
    }

    async fn attempt(&self, request: &ExtractionRequest) -> Result<String, AttemptError> {
        let payload = self.adapter.build_payload(request);
        let builder = self.http.post(&self.url).json(&payload);
        let builder = self.adapter.authorize(builder, self.api_key.as_deref());

        let response = builder.send().await.map_err(|error| {
            AttemptError::Transport(format!("failed to reach {}: {error}", self.url))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Provider {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body: Value = response.json().await.map_err(|error| {
            AttemptError::UnexpectedEnvelope(format!("response body is not JSON: {error}"))
        })?;
        self.adapter.extract_output(&body).ok_or_else(|| {
            AttemptError::UnexpectedEnvelope(format!(
                "{} response carries no text: {}",
                self.adapter.name(),
                truncate(&body.to_string())
            ))
        })
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((index, _)) => format!("{}…", &body[..index]),
        None => body.to_string(),
    }
}
