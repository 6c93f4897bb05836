//! Chat-completions HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{LlmError, LlmResult};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// Instruction placed before the transcript.
pub const SUMMARY_PROMPT: &str =
    "Summarize this text. It is the transcription of a video, so treat it as a video:";

/// Produces a natural-language summary of a transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> LlmResult<String>;
}

/// Configuration for the summarization client.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries for transient failures
    pub max_retries: u32,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 1,
        }
    }
}

impl LlmClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: std::env::var("SUMMARY_MODEL").unwrap_or(defaults.model),
            timeout: Duration::from_secs(
                std::env::var("SUMMARY_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("SUMMARY_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// [`Summarizer`] backed by an OpenAI-compatible API.
pub struct ChatCompletionClient {
    http: Client,
    config: LlmClientConfig,
}

impl ChatCompletionClient {
    /// Create a new client.
    pub fn new(config: LlmClientConfig) -> LlmResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> LlmResult<Self> {
        Self::new(LlmClientConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(&self, text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(format!("{} {}", SUMMARY_PROMPT, text))],
        }
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> LlmResult<String> {
        let url = self.config.endpoint();

        debug!(model = %request.model, "Sending chat completion request to {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ServiceUnavailable(format!(
                "API returned {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .first_content()
            .map(str::to_string)
            .ok_or(LlmError::EmptyCompletion)
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> LlmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Summary request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl Summarizer for ChatCompletionClient {
    async fn summarize(&self, text: &str) -> LlmResult<String> {
        let request = self.build_request(text);
        self.with_retry(|| self.complete(&request)).await
    }
}

/// Summarizer used when no API key is configured; every call fails, so runs
/// complete with the unavailable sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str) -> LlmResult<String> {
        Err(LlmError::MissingApiKey)
    }
}
