pub mod builder;
pub mod config;
pub mod error;
pub mod extractors;
pub mod ingredient_parser;
pub mod matcher;
pub mod model;
pub mod normalizer;
pub mod ocr;
pub mod pipeline;
pub mod providers;
pub mod sources;

pub use builder::{RecipeImporter, RecipeImporterBuilder};
pub use config::ImportConfig;
pub use error::ImportError;
pub use extractors::{ExtractionResult, ExtractorChain, SourceContent};
pub use matcher::{IngredientCatalog, IngredientMatcher, MatchResult};
pub use model::{
    CanonicalIngredient, ExtractedIngredient, ExtractedRecipe, ImportItem, ImportJob,
    IngredientMatch, ItemStatus, JobStatus, MatchType, Recipe, SourceReference, SourceType,
};
pub use normalizer::normalize;
pub use ocr::{OcrEngine, OcrService};
pub use pipeline::{ImportStore, MemoryStore, Orchestrator};
pub use providers::{LlmError, LlmProvider};
pub use sources::SourceInput;
