//! Recipe extraction.
//!
//! A closed set of extractors, tried cheapest first: structured data, then
//! spreadsheet rows, then the AI text extractor. The first one whose
//! `can_extract` accepts the content does the work.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::model::ExtractedRecipe;
use crate::providers::LlmProvider;

pub mod ai_text;
pub mod helpers;
pub mod json_ld;
pub mod spreadsheet;

pub use self::ai_text::AiTextExtractor;

/// Parsed source content, stored on the item between the parse and extract stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceContent {
    Html { html: String },
    /// OCR output for a scanned page
    Markdown { text: String },
    Row { fields: BTreeMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub recipe: Option<ExtractedRecipe>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub extractor_used: Option<String>,
    pub ai_cost_cents: f64,
    /// Transient failure (timeout, provider outage); the stage may be retried
    #[serde(default)]
    pub retryable: bool,
}

impl ExtractionResult {
    pub fn ok(recipe: ExtractedRecipe, extractor: &str, ai_cost_cents: f64) -> Self {
        ExtractionResult {
            success: true,
            recipe: Some(recipe),
            error_message: None,
            error_code: None,
            extractor_used: Some(extractor.to_string()),
            ai_cost_cents,
            retryable: false,
        }
    }

    pub fn failed(
        extractor: Option<&str>,
        code: &str,
        message: impl Into<String>,
        ai_cost_cents: f64,
    ) -> Self {
        ExtractionResult {
            success: false,
            recipe: None,
            error_message: Some(message.into()),
            error_code: Some(code.to_string()),
            extractor_used: extractor.map(str::to_string),
            ai_cost_cents,
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

pub enum Extractor {
    StructuredData,
    SpreadsheetRow,
    AiText(AiTextExtractor),
}

impl Extractor {
    pub fn name(&self) -> &'static str {
        match self {
            Extractor::StructuredData => json_ld::NAME,
            Extractor::SpreadsheetRow => spreadsheet::NAME,
            Extractor::AiText(_) => ai_text::NAME,
        }
    }

    pub fn can_extract(&self, content: &SourceContent, source_url: Option<&str>) -> bool {
        match self {
            Extractor::StructuredData => json_ld::can_extract(content),
            Extractor::SpreadsheetRow => spreadsheet::can_extract(content),
            Extractor::AiText(ai) => ai.can_extract(content, source_url),
        }
    }

    pub async fn extract(
        &self,
        content: &SourceContent,
        source_url: Option<&str>,
    ) -> ExtractionResult {
        match self {
            Extractor::StructuredData => json_ld::extract(content, source_url),
            Extractor::SpreadsheetRow => spreadsheet::extract(content, source_url),
            Extractor::AiText(ai) => ai.extract(content, source_url).await,
        }
    }
}

/// Extractors in priority order
pub struct ExtractorChain {
    extractors: Vec<Extractor>,
}

impl ExtractorChain {
    /// Standard chain; the AI extractor is only present with a provider
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, ai_timeout: Duration) -> Self {
        let mut extractors = vec![Extractor::StructuredData, Extractor::SpreadsheetRow];
        if let Some(llm) = llm {
            extractors.push(Extractor::AiText(AiTextExtractor::new(llm, ai_timeout)));
        }
        ExtractorChain { extractors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(Extractor::name).collect()
    }

    pub async fn extract(
        &self,
        content: &SourceContent,
        source_url: Option<&str>,
    ) -> ExtractionResult {
        let Some(extractor) = self
            .extractors
            .iter()
            .find(|e| e.can_extract(content, source_url))
        else {
            debug!("No extractor accepts content from {:?}", source_url);
            return ExtractionResult::failed(
                None,
                "no_extractor",
                "No extractor could read this source",
                0.0,
            );
        };

        info!("Extracting with {}", extractor.name());
        extractor.extract(content, source_url).await
    }
}
