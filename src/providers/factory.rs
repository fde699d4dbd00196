use crate::config::{ImportConfig, ProviderConfig};
use crate::providers::{
    AnthropicProvider, FallbackProvider, LlmError, LlmProvider, OpenAIProvider,
};
use log::info;
use std::sync::Arc;

pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider instance from configuration
    pub fn create(
        provider_name: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn LlmProvider>, LlmError> {
        // Validate that provider is enabled
        if !config.enabled {
            return Err(LlmError::NotConfigured(format!(
                "Provider '{}' is not enabled in configuration",
                provider_name
            )));
        }

        match provider_name {
            "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
            "anthropic" => Ok(Box::new(AnthropicProvider::new(config)?)),
            _ => Err(LlmError::NotConfigured(format!(
                "Unknown provider: {}",
                provider_name
            ))),
        }
    }

    /// Get the default provider from configuration
    pub fn get_default_provider(config: &ImportConfig) -> Result<Box<dyn LlmProvider>, LlmError> {
        let provider_name = &config.default_provider;
        let provider_config = config.providers.get(provider_name).ok_or_else(|| {
            LlmError::NotConfigured(format!(
                "Default provider '{}' not found in configuration",
                provider_name
            ))
        })?;

        Self::create(provider_name, provider_config)
    }

    /// Build the provider the pipeline talks to, or `None` when no provider is
    /// enabled. Imports then run with structured-data extraction only.
    pub fn from_config(config: &ImportConfig) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
        if !config.providers.values().any(|p| p.enabled) {
            info!("No LLM provider enabled; AI extraction and matching are off");
            return Ok(None);
        }
        let provider = FallbackProvider::new(config)?;
        Ok(Some(Arc::new(provider)))
    }

    /// List all available provider names
    pub fn available_providers() -> Vec<&'static str> {
        vec!["openai", "anthropic"]
    }
}
