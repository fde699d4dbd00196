use crate::config::ProviderConfig;
use crate::providers::{
    error_from_response, parse_json_content, Completion, LlmError, LlmProvider, TokenPricing,
};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    pricing: TokenPricing,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self, LlmError> {
        // Try config first, then fall back to environment variable
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                LlmError::NotConfigured(
                    "ANTHROPIC_API_KEY not found in config or environment".to_string(),
                )
            })?;

        Ok(AnthropicProvider {
            client: Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            pricing: TokenPricing {
                input_cost_per_mtok: config.input_cost_per_mtok,
                output_cost_per_mtok: config.output_cost_per_mtok,
            },
        })
    }

    #[doc(hidden)]
    pub fn with_base_url(api_key: String, base_url: String, model: String) -> Self {
        AnthropicProvider {
            client: Client::new(),
            api_key,
            base_url,
            model,
            temperature: 0.0,
            max_tokens: 4000,
            pricing: TokenPricing::default(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Completion, LlmError> {
        let system_prompt = format!(
            "Respond with a single JSON document and nothing else. It must validate against this JSON schema:\n{}",
            schema
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "system": system_prompt,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt
                    }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        debug!("{:?}", response_body);

        let text = response_body["content"][0]["text"].as_str().ok_or_else(|| {
            LlmError::ParseError("Failed to extract content from Anthropic response".to_string())
        })?;
        let value = parse_json_content(text)?;

        let usage = &response_body["usage"];
        let cost_cents = self.pricing.cost_cents(
            usage["input_tokens"].as_u64().unwrap_or(0),
            usage["output_tokens"].as_u64().unwrap_or(0),
        );

        Ok(Completion { value, cost_cents })
    }
}
