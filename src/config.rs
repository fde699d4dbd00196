use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Main import configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImportConfig {
    /// Default provider to use when fallback is disabled
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Map of provider name to provider configuration
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Fallback configuration for automatic provider switching
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

/// Configuration for a specific AI provider
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Whether this provider is enabled
    pub enabled: bool,
    /// Model identifier (e.g., "gpt-4o-mini", "claude-3-5-haiku-latest")
    pub model: String,
    /// Temperature for generation (0.0-1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API key for authentication (can also be set via environment variable)
    pub api_key: Option<String>,
    /// Base URL for API endpoint (for custom or proxy endpoints)
    pub base_url: Option<String>,
    /// Price of one million prompt tokens, in US cents
    #[serde(default)]
    pub input_cost_per_mtok: f64,
    /// Price of one million completion tokens, in US cents
    #[serde(default)]
    pub output_cost_per_mtok: f64,
}

/// Configuration for provider fallback and retry behavior
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    /// Whether fallback is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Order of providers to try (first to last)
    #[serde(default)]
    pub order: Vec<String>,
    /// Number of retry attempts per provider before fallback
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial delay between retries in milliseconds (linear backoff)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            order: Vec::new(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Ingredient matching thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Minimum similarity for a fuzzy match to be accepted
    #[serde(default = "default_threshold")]
    pub fuzzy_threshold: f64,
    /// Ingredients below this confidence are surfaced for review
    #[serde(default = "default_threshold")]
    pub review_threshold: f64,
    /// Ask the LLM when exact and fuzzy matching fail
    #[serde(default = "default_true")]
    pub ai_fallback: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_threshold(),
            review_threshold: default_threshold(),
            ai_fallback: true,
        }
    }
}

/// Stage retry policy applied by the task queue
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.initial_delay_ms as f64 * factor) as u64)
    }
}

/// Per-call timeouts in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_ai_secs")]
    pub ai_secs: u64,
    #[serde(default = "default_ai_secs")]
    pub ocr_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            ai_secs: default_ai_secs(),
            ocr_secs: default_ai_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn ai(&self) -> Duration {
        Duration::from_secs(self.ai_secs)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_secs(self.ocr_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Number of stage handlers allowed to run at once
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Items whose ingredients all matched confidently skip manual review
    #[serde(default = "default_true")]
    pub auto_approve: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            auto_approve: true,
        }
    }
}

/// Settings for the bundled Google Vision OCR engine
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OcrConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

// Default value functions
fn default_provider() -> String {
    "openai".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_fetch_secs() -> u64 {
    15
}

fn default_ai_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

impl ImportConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables with RECIPE_INGEST__ prefix
    /// 2. config.toml file in current directory
    /// 3. Default values
    ///
    /// Environment variable format: RECIPE_INGEST__MATCHING__FUZZY_THRESHOLD
    pub fn load() -> Result<Self, ConfigError> {
        load_config()
    }
}

/// Load configuration from file and environment variables
pub fn load_config() -> Result<ImportConfig, ConfigError> {
    let settings = Config::builder()
        // Optional config file (can be missing)
        .add_source(File::with_name("config").required(false))
        // Use double underscore for nested: RECIPE_INGEST__PROVIDERS__OPENAI__API_KEY
        .add_source(
            Environment::with_prefix("RECIPE_INGEST")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}
