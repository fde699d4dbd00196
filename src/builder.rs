use std::sync::Arc;

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::matcher::IngredientCatalog;
use crate::model::CanonicalIngredient;
use crate::ocr::OcrService;
use crate::pipeline::{ImportStore, MemoryStore, Orchestrator};
use crate::providers::{LlmProvider, ProviderFactory};

/// Where the LLM used for extraction and matching comes from
#[derive(Default)]
enum LlmChoice {
    /// Whatever the configuration enables
    #[default]
    FromConfig,
    Provider(Arc<dyn LlmProvider>),
    Disabled,
}

/// Builder for wiring up an import pipeline
#[derive(Default)]
pub struct RecipeImporterBuilder {
    config: Option<ImportConfig>,
    store: Option<Arc<dyn ImportStore>>,
    catalog: Vec<CanonicalIngredient>,
    llm: LlmChoice,
    ocr: Option<Arc<OcrService>>,
}

impl RecipeImporterBuilder {
    /// Use this configuration instead of loading `config.toml` and the environment
    ///
    /// # Example
    /// ```
    /// use recipe_ingest::{ImportConfig, RecipeImporter};
    ///
    /// let mut config = ImportConfig::default();
    /// config.pipeline.auto_approve = false;
    /// let builder = RecipeImporter::builder().config(config);
    /// ```
    pub fn config(mut self, config: ImportConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Persist jobs, items and matches somewhere other than memory
    pub fn store(mut self, store: Arc<dyn ImportStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Canonical ingredients that mentions are matched against
    ///
    /// # Example
    /// ```
    /// use recipe_ingest::{CanonicalIngredient, RecipeImporter};
    ///
    /// let builder = RecipeImporter::builder().catalog(vec![
    ///     CanonicalIngredient::new("scallion", &["green onion", "spring onion"]),
    ///     CanonicalIngredient::new("egg", &[]),
    /// ]);
    /// ```
    pub fn catalog(mut self, ingredients: Vec<CanonicalIngredient>) -> Self {
        self.catalog = ingredients;
        self
    }

    /// Use this LLM provider regardless of configuration
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm = LlmChoice::Provider(provider);
        self
    }

    /// Turn off AI extraction and AI matching
    pub fn without_ai(mut self) -> Self {
        self.llm = LlmChoice::Disabled;
        self
    }

    /// OCR service for scanned pages. Defaults to Google Vision, loaded on
    /// first use.
    pub fn ocr(mut self, ocr: Arc<OcrService>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Build the pipeline and start its workers
    ///
    /// # Errors
    /// Returns `ImportError` if:
    /// - No configuration was given and loading it fails
    /// - A configured LLM provider cannot be constructed
    ///
    /// # Example
    /// ```no_run
    /// # use recipe_ingest::{RecipeImporter, SourceInput};
    /// # use uuid::Uuid;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let importer = RecipeImporter::builder().without_ai().build()?;
    /// let job = importer
    ///     .start_import(
    ///         SourceInput::Url("https://example.com/recipe".to_string()),
    ///         Uuid::new_v4(),
    ///         None,
    ///     )
    ///     .await?;
    /// importer.wait_idle().await;
    /// println!("{:?}", importer.get_job(job.id).await?.status);
    /// # Ok(())
    /// # }
    /// ```
    pub fn build(self) -> Result<Arc<Orchestrator>, ImportError> {
        let config = match self.config {
            Some(config) => config,
            None => ImportConfig::load()?,
        };

        let llm = match self.llm {
            LlmChoice::FromConfig => ProviderFactory::from_config(&config)?,
            LlmChoice::Provider(provider) => Some(provider),
            LlmChoice::Disabled => None,
        };
        let ocr = self
            .ocr
            .unwrap_or_else(|| Arc::new(OcrService::google_vision(&config.ocr, config.timeouts.ocr())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        Orchestrator::new(
            &config,
            store,
            Arc::new(IngredientCatalog::new(self.catalog)),
            llm,
            Some(ocr),
        )
    }
}

/// Main entry point for the builder API
pub struct RecipeImporter;

impl RecipeImporter {
    /// Creates a new builder for an import pipeline
    ///
    /// # Example
    /// ```
    /// use recipe_ingest::RecipeImporter;
    ///
    /// let builder = RecipeImporter::builder();
    /// ```
    pub fn builder() -> RecipeImporterBuilder {
        RecipeImporterBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use crate::providers::FakeProvider;
    use crate::sources::SourceInput;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_build_with_explicit_parts() {
        let fake = Arc::new(FakeProvider::new().with_default_response(json!({})));
        let importer = RecipeImporter::builder()
            .config(ImportConfig::default())
            .catalog(vec![CanonicalIngredient::new("egg", &[])])
            .provider(fake)
            .build()
            .unwrap();

        let job = importer
            .start_import(
                SourceInput::Spreadsheet {
                    filename: None,
                    bytes: b"title,ingredients\nBoiled Egg,1 egg\n".to_vec(),
                },
                Uuid::new_v4(),
                None,
            )
            .await
            .unwrap();
        importer.wait_idle().await;

        let job = importer.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.succeeded_items, 1);
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected() {
        let importer = RecipeImporter::builder()
            .config(ImportConfig::default())
            .without_ai()
            .build()
            .unwrap();
        let err = importer
            .start_import(SourceInput::UrlList("\n".to_string()), Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidSource(_)));
    }
}
