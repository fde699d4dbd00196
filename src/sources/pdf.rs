//! PDF documents split into one reference per page.
//!
//! Pages with a usable text layer are imported from that text. Scanned
//! pages are sent through OCR using the page's embedded JPEG image.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lopdf::{Dictionary, Document, Object, ObjectId};
use log::{debug, warn};

use crate::error::ImportError;
use crate::model::SourceReference;

/// Marker lopdf leaves for CID fonts it cannot decode
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Below this many characters the alphanumeric ratio is not checked
const MIN_TOTAL_CHARS: usize = 50;

const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Page tree depth searched for inherited resources
const MAX_PARENT_DEPTH: usize = 16;

pub fn split_pages(bytes: &[u8]) -> Result<Vec<SourceReference>, ImportError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| ImportError::InvalidSource(format!("Failed to load PDF: {}", e)))?;

    let mut references = Vec::new();
    for (number, page_id) in doc.get_pages() {
        let text = doc.extract_text(&[number]).unwrap_or_default();
        if !needs_ocr(&text) {
            debug!("Page {}: using the text layer", number);
            references.push(SourceReference::PageText {
                number,
                text: text.trim().to_string(),
            });
            continue;
        }
        match page_image(&doc, page_id) {
            Some(image) => references.push(SourceReference::Page {
                number,
                image_base64: STANDARD.encode(image),
            }),
            None => warn!("Page {} has neither text nor a JPEG scan, skipping", number),
        }
    }
    Ok(references)
}

/// True when extracted text is empty or too garbled to trust
fn needs_ocr(text: &str) -> bool {
    let trimmed = text.trim();
    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}

/// The largest JPEG image XObject drawn on the page
fn page_image(doc: &Document, page_id: ObjectId) -> Option<Vec<u8>> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

    xobjects
        .iter()
        .filter_map(|(_, object)| resolve(doc, object)?.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map_or(false, |subtype| subtype == b"Image")
        })
        .filter(|stream| is_jpeg(doc, &stream.dict))
        .max_by_key(|stream| stream.content.len())
        .map(|stream| stream.content.clone())
}

/// Resources may live on the page or be inherited from a parent node
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// A stream OCR can read as is: DCT encoded with no other filter
fn is_jpeg(doc: &Document, dict: &Dictionary) -> bool {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return false;
    };
    match filter {
        Object::Name(name) => name == b"DCTDecode",
        Object::Array(filters) => {
            matches!(filters.as_slice(), [Object::Name(name)] if name == b"DCTDecode")
        }
        _ => false,
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    doc.dereference(object).ok().map(|(_, object)| object)
}
