use crate::config::ImportConfig;
use crate::providers::{Completion, LlmError, LlmProvider, ProviderFactory};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

/// Upper bound on a server-requested rate limit pause
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Tries each configured provider in order, retrying transient failures on
/// each before moving on to the next.
pub struct FallbackProvider {
    chain: Vec<Box<dyn LlmProvider>>,
    attempts_per_provider: u32,
    base_delay: Duration,
}

impl FallbackProvider {
    pub fn new(config: &ImportConfig) -> Result<Self, LlmError> {
        if !config.fallback.enabled {
            let provider = ProviderFactory::get_default_provider(config)?;
            return Self::from_providers(vec![provider], 1, 0);
        }

        let chain: Vec<Box<dyn LlmProvider>> = config
            .fallback
            .order
            .iter()
            .filter_map(|name| {
                let Some(provider_config) = config.providers.get(name) else {
                    warn!("Provider '{}' is in the fallback order but not configured", name);
                    return None;
                };
                if !provider_config.enabled {
                    return None;
                }
                ProviderFactory::create(name, provider_config)
                    .map_err(|e| warn!("Skipping provider '{}': {}", name, e))
                    .ok()
            })
            .collect();
        info!(
            "LLM fallback chain: [{}]",
            chain
                .iter()
                .map(|p| p.provider_name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self::from_providers(
            chain,
            config.fallback.retry_attempts,
            config.fallback.retry_delay_ms,
        )
    }

    pub fn from_providers(
        chain: Vec<Box<dyn LlmProvider>>,
        attempts_per_provider: u32,
        retry_delay_ms: u64,
    ) -> Result<Self, LlmError> {
        if chain.is_empty() {
            return Err(LlmError::NotConfigured(
                "no usable provider in the fallback chain".to_string(),
            ));
        }
        Ok(FallbackProvider {
            chain,
            attempts_per_provider: attempts_per_provider.max(1),
            base_delay: Duration::from_millis(retry_delay_ms),
        })
    }

    /// Linear backoff, or the server's own hint when it rate limited us
    fn pause_after(&self, error: &LlmError, attempt: u32) -> Duration {
        match error {
            LlmError::RateLimited {
                retry_after_secs: Some(secs),
            } => Duration::from_secs(*secs).min(MAX_RETRY_AFTER),
            _ => self.base_delay * attempt,
        }
    }

    async fn complete_with(
        &self,
        provider: &dyn LlmProvider,
        prompt: &str,
        schema: &Value,
    ) -> Result<Completion, LlmError> {
        let name = provider.provider_name();
        let mut attempt = 1;
        loop {
            let error = match provider.complete(prompt, schema).await {
                Ok(completion) => {
                    debug!("{} answered on attempt {}", name, attempt);
                    return Ok(completion);
                }
                Err(e) => e,
            };
            warn!(
                "{} failed (attempt {}/{}): {}",
                name, attempt, self.attempts_per_provider, error
            );
            if attempt >= self.attempts_per_provider || !error.is_retryable() {
                return Err(error);
            }
            sleep(self.pause_after(&error, attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmProvider for FallbackProvider {
    fn provider_name(&self) -> &str {
        "fallback"
    }

    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Completion, LlmError> {
        let mut last_error = None;
        for provider in &self.chain {
            match self.complete_with(provider.as_ref(), prompt, schema).await {
                Ok(completion) => return Ok(completion),
                Err(e) => last_error = Some(e),
            }
        }
        // The last provider's error decides whether the caller retries
        Err(last_error
            .unwrap_or_else(|| LlmError::NotConfigured("empty fallback chain".to_string())))
    }
}
