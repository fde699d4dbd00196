use serde_json::{json, Value};

/// The instructions used for extracting a recipe draft from free text.
///
/// Loaded from `extraction_prompt.txt` at compile time so it can be edited
/// without dealing with Rust string syntax.
pub const RECIPE_EXTRACTION_PROMPT: &str = include_str!("extraction_prompt.txt");

/// Full extraction prompt with the source text appended.
pub fn build_extraction_prompt(text: &str, source_url: Option<&str>) -> String {
    let mut prompt = RECIPE_EXTRACTION_PROMPT.to_string();
    if let Some(url) = source_url.map(str::trim).filter(|u| !u.is_empty()) {
        prompt.push_str(&format!("\nSource URL: {}\n", url));
    }
    prompt.push_str("\nText:\n");
    prompt.push_str(text);
    prompt
}

/// JSON schema the extraction answer must follow
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": ["string", "null"]},
            "ingredients": {"type": "array", "items": {"type": "string"}},
            "instructions": {"type": "array", "items": {"type": "string"}},
            "prep_time": {"type": ["integer", "null"]},
            "cook_time": {"type": ["integer", "null"]},
            "total_time": {"type": ["integer", "null"]},
            "servings": {"type": ["integer", "null"]},
            "error": {"type": ["string", "null"]}
        },
        "required": ["title", "ingredients", "instructions"]
    })
}

/// Prompt asking the model to pick the catalog entry an ingredient refers to.
///
/// Each catalog line is `id: name`, aliases in parentheses.
pub fn build_matching_prompt(ingredient: &str, catalog: &[String]) -> String {
    format!(
        "Match the ingredient mention to one entry of the ingredient catalog.\n\
         Answer with the catalog id in \"ingredient_id\" and your confidence between 0 and 1 in \"confidence\".\n\
         If no entry refers to the same ingredient, answer with \"ingredient_id\": null.\n\n\
         Ingredient: {}\n\nCatalog:\n{}",
        ingredient,
        catalog.join("\n")
    )
}

pub fn matching_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ingredient_id": {"type": ["string", "null"]},
            "confidence": {"type": "number"}
        },
        "required": ["ingredient_id", "confidence"]
    })
}
