//! LLM provider abstraction.
//!
//! Every provider answers a prompt with a JSON value conforming to a caller
//! supplied schema, and reports what the call cost.

mod anthropic;
mod factory;
mod fake;
mod fallback;
mod open_ai;
mod prompt;

pub use anthropic::AnthropicProvider;
pub use factory::ProviderFactory;
pub use fake::FakeProvider;
pub use fallback::FallbackProvider;
pub use open_ai::OpenAIProvider;
pub use prompt::{
    build_extraction_prompt, build_matching_prompt, extraction_schema, matching_schema,
    RECIPE_EXTRACTION_PROMPT,
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error type for LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Transport failures, rate limits and 5xx answers are worth another try
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::ParseError(_) | LlmError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::RequestFailed(e.to_string())
    }
}

/// A structured model answer plus its cost
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub value: Value,
    pub cost_cents: f64,
}

/// Unified trait for all LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "anthropic")
    fn provider_name(&self) -> &str;

    /// Send a prompt and get back a JSON value shaped like `schema`
    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Completion, LlmError>;
}

/// Token prices used to turn usage counters into cents
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenPricing {
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl TokenPricing {
    pub fn cost_cents(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_cost_per_mtok
            + output_tokens as f64 * self.output_cost_per_mtok)
            / 1_000_000.0
    }
}

/// Parse model text into JSON, tolerating a markdown code fence around it.
pub(crate) fn parse_json_content(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| LlmError::ParseError(e.to_string()))
}

/// Map a non-success HTTP answer onto an `LlmError`
pub(crate) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return LlmError::RateLimited { retry_after_secs };
    }
    let message = response.text().await.unwrap_or_default();
    LlmError::ApiError {
        status: status.as_u16(),
        message,
    }
}
