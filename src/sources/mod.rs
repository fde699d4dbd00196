//! Source parsing.
//!
//! An import source is split into one `SourceReference` per item when the
//! job starts. The parse stage later turns each reference into
//! `SourceContent` for the extractors: fetching pages, reading spreadsheet
//! rows, or running OCR over scanned pages.

use std::collections::HashSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::extractors::{spreadsheet as row_fields, SourceContent};
use crate::model::{SourceReference, SourceType};
use crate::ocr::OcrService;

mod fetcher;
mod pdf;
mod spreadsheet;

pub use fetcher::{parse_url, PageFetcher};
pub use pdf::split_pages;
pub use spreadsheet::read_rows;

/// What the user asked to import
#[derive(Debug, Clone, PartialEq)]
pub enum SourceInput {
    Url(String),
    /// Newline, comma or whitespace separated URLs
    UrlList(String),
    Spreadsheet {
        filename: Option<String>,
        bytes: Vec<u8>,
    },
    /// A PDF document, one item per page
    Pdf {
        filename: Option<String>,
        bytes: Vec<u8>,
    },
    /// Pre-rendered page images of a scanned document
    ScannedPages {
        filename: Option<String>,
        pages: Vec<Vec<u8>>,
    },
}

impl SourceInput {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceInput::Url(_) => SourceType::Url,
            SourceInput::UrlList(_) => SourceType::UrlList,
            SourceInput::Spreadsheet { .. } => SourceType::Spreadsheet,
            SourceInput::Pdf { .. } | SourceInput::ScannedPages { .. } => SourceType::Pdf,
        }
    }

    pub fn filename(&self) -> Option<String> {
        match self {
            SourceInput::Spreadsheet { filename, .. }
            | SourceInput::Pdf { filename, .. }
            | SourceInput::ScannedPages { filename, .. } => filename.clone(),
            _ => None,
        }
    }

    /// One reference per item.
    ///
    /// URLs are not validated here; a bad URL becomes an item that fails
    /// while parsing so it stays visible to the user.
    pub fn references(&self) -> Result<Vec<SourceReference>, ImportError> {
        let references: Vec<SourceReference> = match self {
            SourceInput::Url(url) => {
                let url = url.trim();
                if url.is_empty() {
                    Vec::new()
                } else {
                    vec![SourceReference::Url {
                        url: url.to_string(),
                    }]
                }
            }
            SourceInput::UrlList(list) => split_url_list(list)
                .into_iter()
                .map(|url| SourceReference::Url { url })
                .collect(),
            SourceInput::Spreadsheet { bytes, .. } => read_rows(bytes)?
                .into_iter()
                .map(|(index, fields)| SourceReference::Row { index, fields })
                .collect(),
            SourceInput::Pdf { bytes, .. } => split_pages(bytes)?,
            SourceInput::ScannedPages { pages, .. } => pages
                .iter()
                .enumerate()
                .map(|(i, page)| SourceReference::Page {
                    number: i as u32 + 1,
                    image_base64: STANDARD.encode(page),
                })
                .collect(),
        };

        if references.is_empty() {
            return Err(ImportError::InvalidSource(format!(
                "{} source contains nothing to import",
                self.source_type().as_str()
            )));
        }
        Ok(references)
    }
}

/// Distinct URLs of a list, in first-seen order
pub fn split_url_list(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .filter(|url| seen.insert(url.to_string()))
        .map(str::to_string)
        .collect()
}

/// Parse stage output, stored as the item's raw data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSource {
    pub content: SourceContent,
    pub source_url: Option<String>,
}

pub struct SourceParser {
    fetcher: PageFetcher,
    ocr: Option<Arc<OcrService>>,
}

impl SourceParser {
    pub fn new(fetcher: PageFetcher, ocr: Option<Arc<OcrService>>) -> Self {
        SourceParser { fetcher, ocr }
    }

    pub async fn parse(&self, reference: &SourceReference) -> Result<ParsedSource, ImportError> {
        match reference {
            SourceReference::Url { url } => self.fetch_page(url).await,
            SourceReference::Row { index, fields } => {
                let url = row_fields::source_url(fields);
                match url {
                    Some(url) if !row_fields::has_ingredients(fields) => {
                        debug!("Row {} has no ingredients, fetching {}", index, url);
                        self.fetch_page(url).await
                    }
                    _ => Ok(ParsedSource {
                        content: SourceContent::Row {
                            fields: fields.clone(),
                        },
                        source_url: url.map(str::to_string),
                    }),
                }
            }
            SourceReference::Page {
                number,
                image_base64,
            } => {
                let ocr = self.ocr.as_ref().ok_or_else(|| {
                    ImportError::InvalidSource("no OCR service is configured".to_string())
                })?;
                let image = STANDARD.decode(image_base64).map_err(|e| {
                    ImportError::InvalidSource(format!("page {} image is not base64: {}", number, e))
                })?;
                let text = ocr.extract_text(&image).await?;
                info!("Page {}: OCR produced {} characters", number, text.len());
                Ok(ParsedSource {
                    content: SourceContent::Markdown { text },
                    source_url: None,
                })
            }
            SourceReference::PageText { text, .. } => Ok(ParsedSource {
                content: SourceContent::Markdown { text: text.clone() },
                source_url: None,
            }),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<ParsedSource, ImportError> {
        let url = parse_url(url)?;
        let html = self.fetcher.fetch(url.as_str()).await?;
        Ok(ParsedSource {
            content: SourceContent::Html { html },
            source_url: Some(url.to_string()),
        })
    }
}
