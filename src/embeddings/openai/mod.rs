
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::config::settings::OPENAI_API_KEY_VAR;
use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

const DEFAULT_BACKOFF_MS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking client for OpenAI-compatible `/embeddings` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    authorization: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RagError::ConfigurationMissing(vec![OPENAI_API_KEY_VAR.to_string()]))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RagError::InvalidConfiguration(format!(
                "invalid embedding base URL '{}': {}",
                config.base_url, e
            ))
        })?;

        Ok(Self {
            endpoint: format!("{}/embeddings", base_url.as_str().trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            authorization: format!("Bearer {}", api_key),
            agent: build_agent(config.timeout()),
            retry_attempts: config.retry_attempts.max(1),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on every further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post_once(&self, body: &str) -> std::result::Result<(u16, String), ureq::Error> {
        let mut response = self
            .agent
            .post(self.endpoint.as_str())
            .header("Authorization", self.authorization.as_str())
            .header("Content-Type", "application/json")
            .send(body)?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        Ok((status, text))
    }

    fn make_request_with_retry(&self, body: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            let error = match self.post_once(body) {
                Ok((status, text)) if (200..300).contains(&status) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(text);
                }
                Ok((status, text)) => {
                    let message = provider_message(&text);
                    if status == 429 || status >= 500 {
                        warn!(
                            "Server error (status {}), attempt {}/{}",
                            status, attempt, self.retry_attempts
                        );
                        RagError::EmbeddingProvider(format!("HTTP {}: {}", status, message))
                    } else {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(RagError::EmbeddingProvider(format!(
                            "HTTP {}: {}",
                            status, message
                        )));
                    }
                }
                Err(ureq::Error::Timeout(timeout)) => {
                    warn!(
                        "Request timed out ({}), attempt {}/{}",
                        timeout, attempt, self.retry_attempts
                    );
                    RagError::Timeout(format!("embedding request to {}", self.endpoint))
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    RagError::EmbeddingProvider(format!("transport error: {}", error))
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(RagError::EmbeddingProvider(error.to_string()));
                }
            };

            last_error = Some(error);

            if attempt < self.retry_attempts {
                let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", self.endpoint);

        Err(last_error.unwrap_or_else(|| {
            RagError::EmbeddingProvider("request failed after retries".to_string())
        }))
    }
}

/// Pull the provider's own error message out of an error body
fn provider_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

impl EmbeddingProvider for OpenAiClient {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from {} ({})",
            texts.len(),
            self.endpoint,
            self.model
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            RagError::EmbeddingProvider(format!("failed to serialize request: {}", e))
        })?;

        let response_text = self.make_request_with_retry(&request_json)?;

        let mut response: EmbeddingResponse =
            serde_json::from_str(&response_text).map_err(|e| {
                RagError::EmbeddingProvider(format!("failed to parse embedding response: {}", e))
            })?;

        if response.data.len() != texts.len() {
            return Err(RagError::EmbeddingProvider(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|entry| entry.index);
        if let Some((position, entry)) = response
            .data
            .iter()
            .enumerate()
            .find(|(position, entry)| entry.index != *position)
        {
            return Err(RagError::EmbeddingProvider(format!(
                "response index {} does not match input position {}",
                entry.index, position
            )));
        }
        Ok(response
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
