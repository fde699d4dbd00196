//! OCR collaborator.
//!
//! An `OcrEngine` turns page image bytes into markdown text. Engines can be
//! expensive to bring up, so `OcrService` owns one explicitly: loaded once on
//! first use (or on `load()`), shared by every caller, dropped on `unload()`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::OcrConfig;
use crate::error::ImportError;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ImportError>;
}

/// Brings an engine up; called at most once per load cycle
#[async_trait]
pub trait OcrLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn OcrEngine>, ImportError>;
}

/// Explicitly owned OCR engine handle
pub struct OcrService {
    loader: Box<dyn OcrLoader>,
    engine: Mutex<Option<Arc<dyn OcrEngine>>>,
    timeout: Duration,
    loads: AtomicUsize,
}

impl OcrService {
    pub fn new(loader: Box<dyn OcrLoader>, timeout: Duration) -> Self {
        OcrService {
            loader,
            engine: Mutex::new(None),
            timeout,
            loads: AtomicUsize::new(0),
        }
    }

    /// Service around an engine that needs no loading
    pub fn with_engine(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self::new(Box::new(Preloaded(engine)), timeout)
    }

    /// Service around the Google Vision engine
    pub fn google_vision(config: &OcrConfig, timeout: Duration) -> Self {
        Self::new(Box::new(GoogleVisionLoader::new(config.clone())), timeout)
    }

    /// Load the engine if it is not loaded yet and return it
    pub async fn load(&self) -> Result<Arc<dyn OcrEngine>, ImportError> {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }
        info!("Loading OCR engine");
        let engine = self.loader.load().await?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        *slot = Some(engine.clone());
        Ok(engine)
    }

    pub async fn is_loaded(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// Drop the engine; the next call loads it again
    pub async fn unload(&self) {
        if self.engine.lock().await.take().is_some() {
            info!("OCR engine unloaded");
        }
    }

    /// How many times the engine has been loaded
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn extract_text(&self, image: &[u8]) -> Result<String, ImportError> {
        let engine = self.load().await?;
        let text = tokio::time::timeout(self.timeout, engine.extract_text(image))
            .await
            .map_err(|_| ImportError::Timeout(self.timeout))??;
        if text.trim().is_empty() {
            return Err(ImportError::ocr("No text detected in image", false));
        }
        debug!("Extracted text from image: {} characters", text.len());
        Ok(text)
    }
}

struct Preloaded(Arc<dyn OcrEngine>);

#[async_trait]
impl OcrLoader for Preloaded {
    async fn load(&self) -> Result<Arc<dyn OcrEngine>, ImportError> {
        Ok(self.0.clone())
    }
}

const GOOGLE_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// OCR through the Google Cloud Vision API
pub struct GoogleVisionOcr {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GoogleVisionOcr {
    pub fn new(api_key: String, endpoint: Option<String>) -> Self {
        GoogleVisionOcr {
            client: Client::new(),
            api_key,
            endpoint: endpoint.unwrap_or_else(|| GOOGLE_VISION_ENDPOINT.to_string()),
        }
    }
}

#[async_trait]
impl OcrEngine for GoogleVisionOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ImportError> {
        let request_body = json!({
            "requests": [{
                "image": {
                    "content": STANDARD.encode(image)
                },
                "features": [{
                    "type": "DOCUMENT_TEXT_DETECTION"
                }]
            }]
        });

        debug!("Sending OCR request to Google Vision API");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ImportError::ocr(e.to_string(), true))?;

        if !response.status().is_success() {
            let status = response.status();
            let retryable =
                status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            let error_text = response.text().await.unwrap_or_default();
            return Err(ImportError::ocr(
                format!("Google Vision API error ({}): {}", status, error_text),
                retryable,
            ));
        }

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| ImportError::ocr(e.to_string(), false))?;

        // The API returns all detected text in the full annotation
        let text = response_body["responses"][0]["fullTextAnnotation"]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(text)
    }
}

struct GoogleVisionLoader {
    config: OcrConfig,
}

impl GoogleVisionLoader {
    fn new(config: OcrConfig) -> Self {
        GoogleVisionLoader { config }
    }
}

#[async_trait]
impl OcrLoader for GoogleVisionLoader {
    async fn load(&self) -> Result<Arc<dyn OcrEngine>, ImportError> {
        // Try config first, then fall back to environment variable
        let api_key = self
            .config
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .ok_or_else(|| {
                ImportError::ocr("GOOGLE_API_KEY not found in config or environment", false)
            })?;
        Ok(Arc::new(GoogleVisionOcr::new(
            api_key,
            self.config.endpoint.clone(),
        )))
    }
}
