//! CSV decoding into header-keyed rows.

use std::collections::BTreeMap;

use csv::{ReaderBuilder, Trim};

use crate::error::ImportError;

/// Data rows of a CSV file, keyed by header, with 1-based row numbers.
///
/// Rows whose cells are all blank are dropped. A file with no data rows is
/// an `InvalidSource`.
pub fn read_rows(bytes: &[u8]) -> Result<Vec<(usize, BTreeMap<String, String>)>, ImportError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::InvalidSource(
            "spreadsheet has no header row".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, value)| !header.is_empty() && !value.is_empty())
            .map(|(header, value)| (header.to_string(), value.to_string()))
            .collect();
        if !fields.is_empty() {
            rows.push((index + 1, fields));
        }
    }

    if rows.is_empty() {
        return Err(ImportError::InvalidSource(
            "spreadsheet has no data rows".to_string(),
        ));
    }
    Ok(rows)
}
