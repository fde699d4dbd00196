//! schema.org `Recipe` structured data embedded as JSON-LD.

use html_escape::decode_html_entities;
use log::debug;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::extractors::helpers::{clean_text, clean_value, parse_duration, parse_servings_value};
use crate::extractors::{ExtractionResult, SourceContent};
use crate::ingredient_parser::parse_ingredient_line;
use crate::model::ExtractedRecipe;

pub const NAME: &str = "structured_data";

const SCRIPT_SELECTOR: &str = "script[type='application/ld+json']";

pub fn can_extract(content: &SourceContent) -> bool {
    match content {
        SourceContent::Html { html } => find_recipe(&Html::parse_document(html)).is_some(),
        _ => false,
    }
}

pub fn extract(content: &SourceContent, source_url: Option<&str>) -> ExtractionResult {
    let SourceContent::Html { html } = content else {
        return ExtractionResult::failed(Some(NAME), "unsupported_content", "Not an HTML page", 0.0);
    };
    let Some(recipe) = find_recipe(&Html::parse_document(html)) else {
        return ExtractionResult::failed(
            Some(NAME),
            "no_structured_data",
            "No valid recipe found in any JSON-LD script",
            0.0,
        );
    };

    let draft = to_draft(&recipe, source_url);
    if draft.ingredients.is_empty() {
        return ExtractionResult::failed(
            Some(NAME),
            "incomplete_recipe",
            "Structured recipe data lists no ingredients",
            0.0,
        );
    }
    ExtractionResult::ok(draft, NAME, 0.0)
}

/// First recipe object found in any JSON-LD block
fn find_recipe(document: &Html) -> Option<Value> {
    let selector = Selector::parse(SCRIPT_SELECTOR).ok()?;
    document.select(&selector).find_map(|script| {
        let cleaned = sanitize_json(&script.inner_html());
        match serde_json::from_str::<Value>(&cleaned) {
            Ok(json_ld) => find_recipe_value(&json_ld).cloned(),
            Err(e) => {
                debug!("Skipping unparseable JSON-LD block: {}", e);
                None
            }
        }
    })
}

fn find_recipe_value(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_recipe_value),
        Value::Object(map) => {
            if is_recipe(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_recipe_value)
        }
        _ => None,
    }
}

fn is_recipe(value: &Value) -> bool {
    let typed = match &value["@type"] {
        Value::String(t) => t == "Recipe",
        Value::Array(types) => types.iter().any(|t| t.as_str() == Some("Recipe")),
        _ => false,
    };
    typed || value.get("recipeInstructions").is_some()
}

// Clean up JSON strings that sites embed sloppily
fn sanitize_json(json_str: &str) -> String {
    let mut cleaned = json_str.trim().to_string();

    // Skip leading junk before the first object
    if !cleaned.starts_with('{') && !cleaned.starts_with('[') {
        if let Some(start) = cleaned.find(['{', '[']) {
            cleaned = cleaned[start..].to_string();
        }
    }

    // Trailing commas and HTML comments
    cleaned = cleaned.replace(",]", "]").replace(",}", "}");
    cleaned = cleaned.replace("<!--", "").replace("-->", "");

    cleaned
}

fn decode_html_symbols(text: &str) -> String {
    // some sites double-encode entities
    decode_html_entities(&decode_html_entities(text)).into_owned()
}

fn text(value: &Value) -> Option<String> {
    clean_value(value).map(|s| decode_html_symbols(&s))
}

fn to_draft(recipe: &Value, source_url: Option<&str>) -> ExtractedRecipe {
    let ingredients = string_list(recipe.get("recipeIngredient").or(recipe.get("ingredients")))
        .iter()
        .map(|line| parse_ingredient_line(line))
        .filter(|i| !i.original_text.is_empty())
        .collect();

    ExtractedRecipe {
        title: text(&recipe["name"]).unwrap_or_else(|| "Untitled Recipe".to_string()),
        description: description(&recipe["description"]),
        ingredients,
        instructions: instructions(&recipe["recipeInstructions"]),
        prep_time_minutes: duration(&recipe["prepTime"]),
        cook_time_minutes: duration(&recipe["cookTime"]),
        total_time_minutes: duration(&recipe["totalTime"]),
        servings: parse_servings_value(&recipe["recipeYield"]),
        source_url: source_url.and_then(clean_text),
        image_url: image(&recipe["image"]),
        author: named(&recipe["author"]),
        cuisine: first_text(&recipe["recipeCuisine"]),
        category: first_text(&recipe["recipeCategory"]),
        tags: keywords(&recipe["keywords"]),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
        Some(Value::String(s)) => s.lines().filter_map(clean_text).map(|l| decode_html_symbols(&l)).collect(),
        _ => Vec::new(),
    }
}

fn description(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => text(&value["text"]),
        other => text(other),
    }
}

fn duration(value: &Value) -> Option<u32> {
    match value {
        Value::String(s) => parse_duration(s),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

fn image(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => clean_text(url),
        Value::Object(_) => value["url"].as_str().and_then(clean_text),
        Value::Array(items) => items.iter().find_map(image),
        _ => None,
    }
}

/// `"Jane"`, `{"name": "Jane"}` or a list of either
fn named(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s).map(|s| decode_html_symbols(&s)),
        Value::Object(_) => text(&value["name"]),
        Value::Array(items) => items.iter().find_map(named),
        _ => None,
    }
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(text),
        other => text(other),
    }
}

fn keywords(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.iter().filter_map(|t| clean_text(t)) {
        let tag = decode_html_symbols(&tag);
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn instructions(value: &Value) -> Vec<String> {
    let mut steps = Vec::new();
    collect_steps(value, &mut steps);
    steps
}

fn collect_steps(value: &Value, steps: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            steps.extend(s.lines().filter_map(clean_text).map(|l| decode_html_symbols(&l)));
        }
        Value::Array(items) => {
            for item in items {
                collect_steps(item, steps);
            }
        }
        Value::Object(map) => {
            // HowToSection nests its steps
            if let Some(elements) = map.get("itemListElement") {
                collect_steps(elements, steps);
            } else if let Some(step) = ["text", "description", "name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(text))
            {
                steps.push(step);
            }
        }
        _ => {}
    }
}
