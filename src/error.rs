use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::ItemStatus;
use crate::providers::LlmError;

/// Errors that can occur while importing recipes
#[derive(Error, Debug)]
pub enum ImportError {
    /// Network or decode failure while reading raw source content
    #[error("Failed to fetch source: {message}")]
    SourceFetch { message: String, retryable: bool },

    /// No extractor could produce a draft recipe
    #[error("Extraction failed ({code}): {message}")]
    Extraction { code: String, message: String },

    /// Ingredient resolution failed entirely (not the same as low confidence)
    #[error("Ingredient matching failed: {0}")]
    Matching(String),

    /// No candidate cleared the confidence threshold and AI fallback is unavailable
    #[error("No ingredient match for '{0}'")]
    NoMatch(String),

    /// Approval attempted twice, or creation attempted on a non-approved item
    #[error("Creation conflict: {0}")]
    CreationConflict(String),

    #[error("Invalid item status transition from {from} to {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    /// The task queue's dispatcher is gone
    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Import job {0} is cancelled")]
    JobCancelled(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    /// The import source itself is unusable (bad URL, undecodable spreadsheet)
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Invalid edits: {0}")]
    InvalidEdits(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Transport failures, 5xx and 429 are retryable; blank pages,
    /// missing credentials and other rejections are not
    #[error("OCR failed: {message}")]
    Ocr { message: String, retryable: bool },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    /// Stable code stored on failed items so the frontend can key localized copy off it
    pub fn code(&self) -> &str {
        match self {
            ImportError::SourceFetch { .. } => "source_fetch_failed",
            ImportError::Extraction { code, .. } => code,
            ImportError::Matching(_) => "matching_failed",
            ImportError::NoMatch(_) => "no_match",
            ImportError::CreationConflict(_) => "creation_conflict",
            ImportError::InvalidTransition { .. } => "invalid_transition",
            ImportError::QueueClosed => "queue_closed",
            ImportError::JobCancelled(_) => "job_cancelled",
            ImportError::NotFound(_) => "not_found",
            ImportError::InvalidSource(_) => "invalid_source",
            ImportError::InvalidEdits(_) => "invalid_edits",
            ImportError::Llm(_) => "ai_unavailable",
            ImportError::Ocr { .. } => "ocr_failed",
            ImportError::Timeout(_) => "timeout",
            ImportError::ConfigError(_) => "config_error",
            ImportError::Json(_) => "serialization_error",
        }
    }

    /// Whether the stage that produced this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::SourceFetch { retryable, .. } => *retryable,
            ImportError::Llm(e) => e.is_retryable(),
            ImportError::Timeout(_) => true,
            ImportError::Ocr { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn fetch(message: impl Into<String>, retryable: bool) -> Self {
        ImportError::SourceFetch {
            message: message.into(),
            retryable,
        }
    }

    pub fn ocr(message: impl Into<String>, retryable: bool) -> Self {
        ImportError::Ocr {
            message: message.into(),
            retryable,
        }
    }

    pub fn extraction(code: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Extraction {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ImportError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout()
            || e.is_connect()
            || e.status().is_some_and(|s| {
                s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
            });
        ImportError::fetch(e.to_string(), retryable)
    }
}

impl From<csv::Error> for ImportError {
    fn from(e: csv::Error) -> Self {
        ImportError::InvalidSource(format!("spreadsheet could not be decoded: {}", e))
    }
}
