//! One spreadsheet row per recipe, columns found through header aliases.

use std::collections::BTreeMap;

use crate::extractors::helpers::{clean_text, parse_duration, parse_servings};
use crate::extractors::{ExtractionResult, SourceContent};
use crate::ingredient_parser::parse_ingredient_line;
use crate::model::ExtractedRecipe;

pub const NAME: &str = "spreadsheet_row";

const TITLE: &[&str] = &["title", "name", "recipe"];
const INGREDIENTS: &[&str] = &["ingredients"];
const INSTRUCTIONS: &[&str] = &["instructions", "directions", "method", "steps"];
const PREP_TIME: &[&str] = &["prep_time", "prep"];
const COOK_TIME: &[&str] = &["cook_time", "cook"];
const TOTAL_TIME: &[&str] = &["total_time", "time"];
const SERVINGS: &[&str] = &["servings", "yield"];
const DESCRIPTION: &[&str] = &["description"];
const SOURCE: &[&str] = &["source", "url", "source_url", "recipe_url", "link"];
const TAGS: &[&str] = &["tags", "keywords"];

/// Value of the first column whose header matches one of `aliases`.
/// Headers compare case-insensitively with spaces and dashes read as `_`.
pub fn field<'a>(fields: &'a BTreeMap<String, String>, aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .find(|(header, value)| header_key(header) == *alias && !value.trim().is_empty())
            .map(|(_, value)| value.as_str())
    })
}

fn header_key(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// The row's URL column, if it has one
pub fn source_url(fields: &BTreeMap<String, String>) -> Option<&str> {
    field(fields, SOURCE)
}

pub fn has_ingredients(fields: &BTreeMap<String, String>) -> bool {
    field(fields, INGREDIENTS).is_some()
}

pub fn can_extract(content: &SourceContent) -> bool {
    match content {
        SourceContent::Row { fields } => {
            field(fields, TITLE).is_some() && has_ingredients(fields)
        }
        _ => false,
    }
}

pub fn extract(content: &SourceContent, source_url_hint: Option<&str>) -> ExtractionResult {
    let SourceContent::Row { fields } = content else {
        return ExtractionResult::failed(
            Some(NAME),
            "unsupported_content",
            "Not a spreadsheet row",
            0.0,
        );
    };
    let Some(title) = field(fields, TITLE).and_then(clean_text) else {
        return ExtractionResult::failed(Some(NAME), "incomplete_recipe", "Row has no title", 0.0);
    };

    let ingredients: Vec<_> = split_cell(field(fields, INGREDIENTS))
        .iter()
        .map(|line| parse_ingredient_line(line))
        .collect();
    if ingredients.is_empty() {
        return ExtractionResult::failed(
            Some(NAME),
            "incomplete_recipe",
            "Row has no ingredients",
            0.0,
        );
    }

    let recipe = ExtractedRecipe {
        title,
        description: field(fields, DESCRIPTION).and_then(clean_text),
        ingredients,
        instructions: split_cell(field(fields, INSTRUCTIONS)),
        prep_time_minutes: field(fields, PREP_TIME).and_then(parse_duration),
        cook_time_minutes: field(fields, COOK_TIME).and_then(parse_duration),
        total_time_minutes: field(fields, TOTAL_TIME).and_then(parse_duration),
        servings: field(fields, SERVINGS).and_then(parse_servings),
        source_url: source_url(fields)
            .or(source_url_hint)
            .and_then(clean_text),
        tags: field(fields, TAGS)
            .map(|t| t.split(',').filter_map(clean_text).collect())
            .unwrap_or_default(),
        ..Default::default()
    };
    ExtractionResult::ok(recipe, NAME, 0.0)
}

/// Split a multi-value cell on newlines, `;` or `|`
fn split_cell(cell: Option<&str>) -> Vec<String> {
    cell.map(|c| c.split(['\n', ';', '|']).filter_map(clean_text).collect())
        .unwrap_or_default()
}
