//! Free-text extraction through an LLM.
//!
//! Visible page text (or OCR markdown) is sent to the model together with the
//! extraction schema. The model reports pages that hold no recipe through the
//! `error` field.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;

use crate::extractors::helpers::{clean_text, clean_value, parse_duration, parse_servings_value};
use crate::extractors::{ExtractionResult, SourceContent};
use crate::ingredient_parser::parse_ingredient_line;
use crate::model::ExtractedRecipe;
use crate::providers::{build_extraction_prompt, extraction_schema, LlmProvider};

pub const NAME: &str = "ai_text";

pub struct AiTextExtractor {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl AiTextExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        AiTextExtractor { llm, timeout }
    }

    pub fn can_extract(&self, content: &SourceContent, _source_url: Option<&str>) -> bool {
        match content {
            SourceContent::Html { html } => {
                !extract_inner_texts(&Html::parse_document(html)).is_empty()
            }
            SourceContent::Markdown { text } => !text.trim().is_empty(),
            SourceContent::Row { .. } => false,
        }
    }

    pub async fn extract(
        &self,
        content: &SourceContent,
        source_url: Option<&str>,
    ) -> ExtractionResult {
        let (text, page_title) = match content {
            SourceContent::Html { html } => {
                let document = Html::parse_document(html);
                (extract_inner_texts(&document).join("\n"), page_title(&document))
            }
            SourceContent::Markdown { text } => (text.clone(), None),
            SourceContent::Row { .. } => {
                return ExtractionResult::failed(
                    Some(NAME),
                    "unsupported_content",
                    "Spreadsheet rows are not sent to the model",
                    0.0,
                )
            }
        };

        info!(
            "Sending {} characters to {} for extraction",
            text.len(),
            self.llm.provider_name()
        );
        let prompt = build_extraction_prompt(&text, source_url);
        let completion =
            match tokio::time::timeout(self.timeout, self.llm.complete(&prompt, &extraction_schema()))
                .await
            {
                Ok(Ok(completion)) => completion,
                Ok(Err(e)) => {
                    warn!("AI extraction failed: {}", e);
                    let result =
                        ExtractionResult::failed(Some(NAME), "ai_unavailable", e.to_string(), 0.0);
                    return if e.is_retryable() {
                        result.retryable()
                    } else {
                        result
                    };
                }
                Err(_) => {
                    warn!("AI extraction timed out after {:?}", self.timeout);
                    return ExtractionResult::failed(
                        Some(NAME),
                        "timeout",
                        format!("Model did not answer within {:?}", self.timeout),
                        0.0,
                    )
                    .retryable();
                }
            };

        let cost = completion.cost_cents;
        let answer = completion.value;
        if let Some(error) = answer["error"].as_str().and_then(clean_text) {
            return ExtractionResult::failed(Some(NAME), "not_a_recipe", error, cost);
        }

        let ingredients: Vec<_> = string_list(&answer["ingredients"])
            .iter()
            .map(|line| parse_ingredient_line(line))
            .collect();
        if ingredients.is_empty() {
            return ExtractionResult::failed(
                Some(NAME),
                "not_a_recipe",
                "Model found no ingredients in the text",
                cost,
            );
        }

        let recipe = ExtractedRecipe {
            title: clean_value(&answer["title"])
                .or(page_title)
                .unwrap_or_else(|| "Untitled Recipe".to_string()),
            description: clean_value(&answer["description"]),
            ingredients,
            instructions: string_list(&answer["instructions"]),
            prep_time_minutes: minutes(&answer["prep_time"]),
            cook_time_minutes: minutes(&answer["cook_time"]),
            total_time_minutes: minutes(&answer["total_time"]),
            servings: parse_servings_value(&answer["servings"]),
            source_url: source_url.and_then(clean_text),
            ..Default::default()
        };
        ExtractionResult::ok(recipe, NAME, cost)
    }
}

/// Minutes as a bare number, or any duration string the helpers understand
fn minutes(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        Value::String(s) => parse_duration(s),
        _ => None,
    }
}

/// Non-empty strings of an array; a single string is split on lines
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(clean_value).collect(),
        Value::String(s) => s.lines().filter_map(clean_text).collect(),
        _ => Vec::new(),
    }
}

fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| clean_text(&el.text().collect::<String>()))
}

/// Visible text of a page, one entry per block element
fn extract_inner_texts(document: &Html) -> Vec<String> {
    let mut tokens = Vec::new();
    collect_text(&document.root_element(), &mut tokens);

    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        match token {
            TextToken::Break => flush_block(&mut current, &mut blocks),
            TextToken::Text(text) => current.push(text),
        }
    }
    flush_block(&mut current, &mut blocks);
    blocks
}

enum TextToken {
    Text(String),
    Break,
}

fn flush_block(current: &mut Vec<String>, blocks: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let merged = current.join(" ").trim().to_string();
    if !merged.is_empty() {
        blocks.push(merged);
    }
    current.clear();
}

fn collect_text(element: &ElementRef, tokens: &mut Vec<TextToken>) {
    if is_hidden(element) || is_skipped(element) {
        return;
    }

    let tag = element.value().name().to_lowercase();
    if tag == "br" {
        tokens.push(TextToken::Break);
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !text.is_empty() {
                    tokens.push(TextToken::Text(text));
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(&child, tokens);
                }
            }
            _ => {}
        }
    }

    if is_block_element(&tag) {
        tokens.push(TextToken::Break);
    }
}

fn is_hidden(element: &ElementRef) -> bool {
    element.value().attr("hidden").is_some()
        || element
            .value()
            .attr("style")
            .is_some_and(|s| s.contains("display: none") || s.contains("visibility: hidden"))
}

fn is_skipped(element: &ElementRef) -> bool {
    matches!(
        element.value().name().to_lowercase().as_str(),
        "head" | "script" | "style" | "noscript" | "iframe" | "canvas" | "svg"
    )
}

fn is_block_element(tag: &str) -> bool {
    matches!(
        tag,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "dd"
            | "div"
            | "dl"
            | "dt"
            | "figcaption"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "li"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "tr"
            | "ul"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FakeProvider;
    use serde_json::json;

    fn html(body: &str) -> SourceContent {
        SourceContent::Html {
            html: body.to_string(),
        }
    }

    #[test]
    fn test_visible_text_blocks() {
        let document = Html::parse_document(
            r#"
            <html><head><title>Pasta</title></head><body>
                <div>Visible</div>
                <div hidden>Hidden</div>
                <div style="display: none">Also Hidden</div>
                <script>console.log('skip');</script>
                <p>200 g <b>pasta</b><br>1 jar sauce</p>
            </body></html>
        "#,
        );
        assert_eq!(
            extract_inner_texts(&document),
            vec!["Visible", "200 g pasta", "1 jar sauce"]
        );
    }

    #[tokio::test]
    async fn test_extracts_draft_from_model_answer() {
        let fake = Arc::new(
            FakeProvider::new()
                .with_default_response(json!({
                    "title": "",
                    "ingredients": ["200 g pasta", "1 jar tomato sauce"],
                    "instructions": ["Boil pasta", "Add sauce"],
                    "prep_time": 5,
                    "cook_time": "PT10M",
                    "servings": 2,
                    "error": null
                }))
                .with_cost(0.4),
        );
        let extractor = AiTextExtractor::new(fake.clone(), Duration::from_secs(1));
        let content = html(
            "<html><head><title>Weeknight Pasta</title></head><body><p>Boil pasta</p></body></html>",
        );
        assert!(extractor.can_extract(&content, None));

        let result = extractor
            .extract(&content, Some("https://example.com/pasta"))
            .await;
        assert!(result.success);
        assert_eq!(result.ai_cost_cents, 0.4);
        let recipe = result.recipe.unwrap();
        assert_eq!(recipe.title, "Weeknight Pasta");
        assert_eq!(recipe.ingredients[0].quantity, Some(200.0));
        assert_eq!(recipe.instructions.len(), 2);
        assert_eq!(recipe.prep_time_minutes, Some(5));
        assert_eq!(recipe.cook_time_minutes, Some(10));
        assert_eq!(recipe.servings, Some(2));
        assert_eq!(
            recipe.source_url.as_deref(),
            Some("https://example.com/pasta")
        );
    }

    #[tokio::test]
    async fn test_model_reports_not_a_recipe() {
        let fake = Arc::new(
            FakeProvider::new()
                .with_default_response(json!({
                    "title": "", "ingredients": [], "instructions": [],
                    "error": "This page is a privacy policy"
                }))
                .with_cost(0.1),
        );
        let extractor = AiTextExtractor::new(fake, Duration::from_secs(1));
        let result = extractor
            .extract(
                &SourceContent::Markdown {
                    text: "We value your privacy".to_string(),
                },
                None,
            )
            .await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.error_code.as_deref(), Some("not_a_recipe"));
        assert_eq!(result.ai_cost_cents, 0.1);
    }

    #[tokio::test]
    async fn test_provider_outage_is_retryable() {
        let fake = Arc::new(FakeProvider::new().failing_first(1));
        let extractor = AiTextExtractor::new(fake, Duration::from_secs(1));
        let result = extractor.extract(&html("<p>Soup</p>"), None).await;
        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(result.error_code.as_deref(), Some("ai_unavailable"));
    }

    #[test]
    fn test_empty_page_is_not_extractable() {
        let fake = Arc::new(FakeProvider::new());
        let extractor = AiTextExtractor::new(fake, Duration::from_secs(1));
        assert!(!extractor.can_extract(&html("<html><body>  </body></html>"), None));
        assert!(!extractor.can_extract(
            &SourceContent::Row {
                fields: Default::default()
            },
            None
        ));
    }
}
