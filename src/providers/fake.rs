//! Fake LLM provider for testing.
//!
//! Returns canned JSON picked by prompt substring, so pipelines can run
//! without network access or API costs. Every call is counted.

use super::{Completion, LlmError, LlmProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct FakeProvider {
    /// Prompt substring -> response, checked in insertion order
    responses: Vec<(String, Value)>,
    /// Default response if no match found
    default_response: Option<Value>,
    cost_per_call_cents: f64,
    /// Calls that fail with a transient error before answers start flowing
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeProvider {
    /// Create a new FakeProvider with no registered responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a FakeProvider that returns a specific response for prompts containing a substring.
    pub fn with_response(prompt_contains: &str, response: Value) -> Self {
        Self::new().and_response(prompt_contains, response)
    }

    /// Add a response for prompts containing a specific substring.
    pub fn and_response(mut self, prompt_contains: &str, response: Value) -> Self {
        self.responses
            .push((prompt_contains.to_lowercase(), response));
        self
    }

    /// Set the default response when no pattern matches.
    pub fn with_default_response(mut self, response: Value) -> Self {
        self.default_response = Some(response);
        self
    }

    pub fn with_cost(mut self, cents: f64) -> Self {
        self.cost_per_call_cents = cents;
        self
    }

    /// Fail the first `n` calls with a retryable error
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `complete` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    fn provider_name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, prompt: &str, _schema: &Value) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LlmError::RequestFailed(
                "FakeProvider: simulated outage".to_string(),
            ));
        }

        // Find first matching pattern (case-insensitive)
        let prompt_lower = prompt.to_lowercase();
        let response = self
            .responses
            .iter()
            .find(|(pattern, _)| prompt_lower.contains(pattern))
            .map(|(_, response)| response)
            .or(self.default_response.as_ref());

        match response {
            Some(value) => Ok(Completion {
                value: value.clone(),
                cost_cents: self.cost_per_call_cents,
            }),
            None => Err(LlmError::RequestFailed(format!(
                "FakeProvider: No response configured for prompt (first 100 chars): {}",
                prompt.chars().take(100).collect::<String>()
            ))),
        }
    }
}
