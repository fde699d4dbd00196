use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Status of an import session. Derived from its items, see `pipeline::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    AwaitingReview,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Url,
    UrlList,
    Spreadsheet,
    Pdf,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Url => "url",
            SourceType::UrlList => "url_list",
            SourceType::Spreadsheet => "spreadsheet",
            SourceType::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Parsing,
    Extracting,
    Matching,
    AwaitingReview,
    Approved,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 9] = [
        ItemStatus::Pending,
        ItemStatus::Parsing,
        ItemStatus::Extracting,
        ItemStatus::Matching,
        ItemStatus::AwaitingReview,
        ItemStatus::Approved,
        ItemStatus::Completed,
        ItemStatus::Failed,
        ItemStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Parsing => "parsing",
            ItemStatus::Extracting => "extracting",
            ItemStatus::Matching => "matching",
            ItemStatus::AwaitingReview => "awaiting_review",
            ItemStatus::Approved => "approved",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item came from. Row and page variants carry the input payload
/// the source parser works from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceReference {
    Url {
        url: String,
    },
    Row {
        index: usize,
        fields: BTreeMap<String, String>,
    },
    /// A scanned page, read with OCR
    Page {
        number: u32,
        image_base64: String,
    },
    /// A PDF page with its own text layer
    PageText {
        number: u32,
        text: String,
    },
}

impl SourceReference {
    /// Short human-readable label (URL, "row 3", "page 2")
    pub fn label(&self) -> String {
        match self {
            SourceReference::Url { url } => url.clone(),
            SourceReference::Row { index, .. } => format!("row {}", index),
            SourceReference::Page { number, .. } | SourceReference::PageText { number, .. } => {
                format!("page {}", number)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub source_type: SourceType,
    pub source_filename: Option<String>,
    pub total_items: usize,
    pub processed_items: usize,
    pub succeeded_items: usize,
    pub failed_items: usize,
    pub pending_review_items: usize,
    pub skipped_items: usize,
    pub total_ai_cost_cents: f64,
    pub owner_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        source_type: SourceType,
        source_filename: Option<String>,
        owner_id: Uuid,
        collection_id: Option<Uuid>,
        total_items: usize,
    ) -> Self {
        ImportJob {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            source_type,
            source_filename,
            total_items,
            processed_items: 0,
            succeeded_items: 0,
            failed_items: 0,
            pending_review_items: 0,
            skipped_items: 0,
            total_ai_cost_cents: 0.0,
            owner_id,
            collection_id,
            started_at: None,
            completed_at: None,
        }
    }

    /// Items that are still pending or moving through an automated stage
    pub fn in_flight_items(&self) -> usize {
        self.total_items.saturating_sub(
            self.succeeded_items
                + self.failed_items
                + self.pending_review_items
                + self.skipped_items,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: ItemStatus,
    pub source_reference: SourceReference,
    /// Parsed source content written by the parse stage
    pub raw_data: Option<Value>,
    pub parsed_recipe: Option<ExtractedRecipe>,
    /// Per-field overrides merged over `parsed_recipe` at creation time
    pub user_edits: Option<Map<String, Value>>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub ai_cost_cents: f64,
    pub extractor_used: Option<String>,
    pub created_recipe_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl ImportItem {
    pub fn new(job_id: Uuid, source_reference: SourceReference) -> Self {
        ImportItem {
            id: Uuid::new_v4(),
            job_id,
            status: ItemStatus::Pending,
            source_reference,
            raw_data: None,
            parsed_recipe: None,
            user_edits: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            ai_cost_cents: 0.0,
            extractor_used: None,
            created_recipe_id: None,
            updated_at: Utc::now(),
        }
    }

    /// The draft with user edits applied; user edits win per top-level field.
    pub fn effective_recipe(&self) -> Result<Option<ExtractedRecipe>, serde_json::Error> {
        let Some(parsed) = &self.parsed_recipe else {
            return Ok(None);
        };
        match &self.user_edits {
            None => Ok(Some(parsed.clone())),
            Some(edits) => merge_edits(parsed, edits).map(Some),
        }
    }
}

/// Overlay `edits` onto `recipe`, field by field.
pub fn merge_edits(
    recipe: &ExtractedRecipe,
    edits: &Map<String, Value>,
) -> Result<ExtractedRecipe, serde_json::Error> {
    let mut base = match serde_json::to_value(recipe)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in edits {
        base.insert(key.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(base))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Ai,
    UserSelected,
}

impl MatchType {
    /// Exact and user-selected matches never need a second look
    pub fn is_authoritative(&self) -> bool {
        matches!(self, MatchType::Exact | MatchType::UserSelected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtractedIngredient {
    pub original_text: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub name: String,
    pub optional: bool,
    pub ingredient_id: Option<Uuid>,
    pub match_confidence: Option<f64>,
    pub match_type: Option<MatchType>,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExtractedRecipe {
    pub title: String,
    pub description: Option<String>,
    pub ingredients: Vec<ExtractedIngredient>,
    pub instructions: Vec<String>,
    pub prep_time_minutes: Option<u32>,
    pub cook_time_minutes: Option<u32>,
    pub total_time_minutes: Option<u32>,
    pub servings: Option<u32>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub cuisine: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl ExtractedRecipe {
    pub fn needs_review(&self) -> bool {
        self.ingredients.iter().any(|i| i.needs_review)
    }
}

/// Persistent ingredient decision cache row, unique on `source_text_normalized`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientMatch {
    pub source_text: String,
    pub source_text_normalized: String,
    pub matched_ingredient_id: Option<Uuid>,
    pub match_type: MatchType,
    pub confidence: f64,
    /// `Some(true)` marks an authoritative user decision, `Some(false)` an invalidated one
    pub user_confirmed: Option<bool>,
    pub confirmed_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIngredient {
    /// Catalog files may leave ids out; a fresh one is assigned
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CanonicalIngredient {
    pub fn new(name: impl Into<String>, aliases: &[&str]) -> Self {
        CanonicalIngredient {
            id: Uuid::new_v4(),
            name: name.into(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// A materialized recipe, created once per approved item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub import_item_id: Uuid,
    pub owner_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Vec<String>,
    pub prep_time_minutes: Option<u32>,
    pub cook_time_minutes: Option<u32>,
    pub total_time_minutes: Option<u32>,
    pub servings: Option<u32>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub ingredients: Vec<RecipeIngredient>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub position: usize,
    pub ingredient_id: Option<Uuid>,
    pub original_text: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub name: String,
    pub optional: bool,
}
