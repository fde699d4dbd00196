use crate::config::ProviderConfig;
use crate::providers::{
    error_from_response, parse_json_content, Completion, LlmError, LlmProvider, TokenPricing,
};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    pricing: TokenPricing,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self, LlmError> {
        // Try config first, then fall back to environment variable
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                LlmError::NotConfigured(
                    "OPENAI_API_KEY not found in config or environment".to_string(),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(OpenAIProvider {
            client: Client::new(),
            api_key,
            base_url,
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
        OpenAIProvider {
            client: Client::new(),
            api_key,
            base_url,
            model,
            temperature: 0.0,
            max_tokens: 2000,
            pricing: TokenPricing::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: TokenPricing) -> Self {
        self.pricing = pricing;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Completion, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "user", "content": prompt}
                ],
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {"name": "result", "schema": schema}
                },
                "temperature": self.temperature,
                "max_tokens": self.max_tokens
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

        let content = response_body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LlmError::ParseError("Failed to extract content from response".to_string())
            })?;
        let value = parse_json_content(content)?;

        let usage = &response_body["usage"];
        let cost_cents = self.pricing.cost_cents(
            usage["prompt_tokens"].as_u64().unwrap_or(0),
            usage["completion_tokens"].as_u64().unwrap_or(0),
        );

        Ok(Completion { value, cost_cents })
    }
}
