//! Import pipeline orchestrator.
//!
//! Sequences parse, extract, match and create for every item of a job,
//! persists each transition through the store and recomputes the job after
//! every one of them. Review actions (edits, approval, skipping, retries)
//! enter here too.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::extractors::ExtractorChain;
use crate::matcher::{IngredientCatalog, IngredientMatcher};
use crate::model::{
    merge_edits, ImportItem, ImportJob, IngredientMatch, ItemStatus, JobStatus, Recipe,
    RecipeIngredient,
};
use crate::ocr::OcrService;
use crate::pipeline::queue::{StageHandler, TaskQueue};
use crate::pipeline::state::{apply_counts, transition, Stage};
use crate::pipeline::store::ImportStore;
use crate::providers::{LlmError, LlmProvider};
use crate::sources::{PageFetcher, ParsedSource, SourceInput, SourceParser};

pub struct Orchestrator {
    store: Arc<dyn ImportStore>,
    parser: SourceParser,
    extractors: ExtractorChain,
    matcher: IngredientMatcher,
    queue: TaskQueue,
    review_threshold: f64,
    auto_approve: bool,
    ai_timeout: Duration,
}

impl Orchestrator {
    /// Build the pipeline and start its workers. Must be called from within
    /// a Tokio runtime.
    pub fn new(
        config: &ImportConfig,
        store: Arc<dyn ImportStore>,
        catalog: Arc<IngredientCatalog>,
        llm: Option<Arc<dyn LlmProvider>>,
        ocr: Option<Arc<OcrService>>,
    ) -> Result<Arc<Self>, ImportError> {
        let parser = SourceParser::new(PageFetcher::new(config.timeouts.fetch())?, ocr);
        let extractors = ExtractorChain::new(llm.clone(), config.timeouts.ai());
        let matcher = IngredientMatcher::new(
            catalog,
            store.clone(),
            llm,
            config.matching.clone(),
            config.timeouts.ai(),
        );
        info!("Extractors: {}", extractors.names().join(", "));

        let workers = config.pipeline.workers;
        let retry = config.retry.clone();
        Ok(Arc::new_cyclic(|me: &Weak<Orchestrator>| {
            let handler: Weak<dyn StageHandler> = me.clone();
            Orchestrator {
                store,
                parser,
                extractors,
                matcher,
                queue: TaskQueue::start(handler, workers, retry),
                review_threshold: config.matching.review_threshold,
                auto_approve: config.pipeline.auto_approve,
                ai_timeout: config.timeouts.ai(),
            }
        }))
    }

    pub fn matcher(&self) -> &IngredientMatcher {
        &self.matcher
    }

    /// Create the job and its items, then queue every item for parsing.
    ///
    /// Returns as soon as the work is queued. A source with nothing to import
    /// is rejected before any job exists.
    pub async fn start_import(
        &self,
        source: SourceInput,
        owner_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<ImportJob, ImportError> {
        let references = source.references()?;
        let job = ImportJob::new(
            source.source_type(),
            source.filename(),
            owner_id,
            collection_id,
            references.len(),
        );
        let items: Vec<ImportItem> = references
            .into_iter()
            .map(|reference| ImportItem::new(job.id, reference))
            .collect();
        let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();

        self.store.insert_job(job.clone(), items).await?;
        info!(
            "Started {} import {} with {} items",
            job.source_type.as_str(),
            job.id,
            item_ids.len()
        );
        for item_id in item_ids {
            self.queue.enqueue(Stage::Parse, item_id)?;
        }
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.store.get_job(job_id).await
    }

    pub async fn list_items(&self, job_id: Uuid) -> Result<Vec<ImportItem>, ImportError> {
        self.store.list_items(job_id).await
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        self.store.get_item(item_id).await
    }

    /// Store user edits over the draft; later edits win per field.
    pub async fn update_item(
        &self,
        item_id: Uuid,
        edits: Map<String, Value>,
    ) -> Result<ImportItem, ImportError> {
        let item = self.store.get_item(item_id).await?;
        self.ensure_active(item.job_id).await?;

        self.store
            .update_item(
                item_id,
                Box::new(move |item| {
                    if item.status != ItemStatus::AwaitingReview {
                        return Err(ImportError::InvalidEdits(format!(
                            "item is {}, edits are only accepted while awaiting review",
                            item.status
                        )));
                    }
                    let parsed = item.parsed_recipe.as_ref().ok_or_else(|| {
                        ImportError::InvalidEdits("item has no extracted recipe".to_string())
                    })?;
                    let mut merged = item.user_edits.clone().unwrap_or_default();
                    merged.extend(edits);
                    merge_edits(parsed, &merged)
                        .map_err(|e| ImportError::InvalidEdits(e.to_string()))?;
                    item.user_edits = Some(merged);
                    Ok(())
                }),
            )
            .await
    }

    /// Approve an item awaiting review and create its recipe.
    ///
    /// Creation happens at most once: approving an item that is already
    /// approved or completed is a `CreationConflict`.
    pub async fn approve_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        let item = self.store.get_item(item_id).await?;
        self.ensure_active(item.job_id).await?;

        let item = self
            .store
            .update_item(
                item_id,
                Box::new(|item| match item.status {
                    ItemStatus::AwaitingReview => transition(item, ItemStatus::Approved),
                    ItemStatus::Approved | ItemStatus::Completed => {
                        Err(ImportError::CreationConflict(format!(
                            "item {} is already {}",
                            item.id, item.status
                        )))
                    }
                    status => Err(ImportError::CreationConflict(format!(
                        "item {} is {}, not awaiting review",
                        item.id, status
                    ))),
                }),
            )
            .await?;
        self.refresh(item.job_id).await?;

        match self.create(item_id).await {
            Ok(item) => Ok(item),
            Err(e) => {
                if !matches!(e, ImportError::CreationConflict(_)) {
                    self.mark_failed(item_id, &e).await;
                }
                Err(e)
            }
        }
    }

    pub async fn skip_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        let item = self.store.get_item(item_id).await?;
        self.ensure_active(item.job_id).await?;

        let item = self
            .store
            .update_item(
                item_id,
                Box::new(|item| transition(item, ItemStatus::Skipped)),
            )
            .await?;
        self.refresh(item.job_id).await?;
        info!("Item {} skipped", item_id);
        Ok(item)
    }

    /// Stop advancing the job's items. Stages already running finish their
    /// current step; nothing after it is dispatched.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let job = self
            .store
            .update_job(
                job_id,
                Box::new(|job| {
                    if job.status != JobStatus::Completed {
                        job.status = JobStatus::Cancelled;
                        job.completed_at = Some(Utc::now());
                    }
                    Ok(())
                }),
            )
            .await?;
        info!("Job {} is {:?}", job_id, job.status);
        Ok(job)
    }

    /// Send a failed item back through the pipeline from the start
    pub async fn retry_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        let item = self.store.get_item(item_id).await?;
        self.ensure_active(item.job_id).await?;

        let item = self
            .store
            .update_item(
                item_id,
                Box::new(|item| {
                    transition(item, ItemStatus::Pending)?;
                    item.retry_count += 1;
                    item.error_code = None;
                    item.error_message = None;
                    item.raw_data = None;
                    item.parsed_recipe = None;
                    item.extractor_used = None;
                    Ok(())
                }),
            )
            .await?;
        self.refresh(item.job_id).await?;
        self.queue.enqueue(Stage::Parse, item_id)?;
        info!("Item {} queued again (retry {})", item_id, item.retry_count);
        Ok(item)
    }

    /// Record a user's ingredient correction
    pub async fn confirm_match(
        &self,
        raw_text: &str,
        ingredient_id: Uuid,
        user_id: Uuid,
    ) -> Result<IngredientMatch, ImportError> {
        self.matcher
            .confirm_match(raw_text, ingredient_id, user_id)
            .await
    }

    pub async fn invalidate_match(&self, raw_text: &str) -> Result<IngredientMatch, ImportError> {
        self.matcher.invalidate_match(raw_text).await
    }

    /// Wait until the queue has no work left
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    async fn ensure_active(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let job = self.store.get_job(job_id).await?;
        if job.status == JobStatus::Cancelled {
            return Err(ImportError::JobCancelled(job_id));
        }
        Ok(job)
    }

    async fn refresh(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.store.refresh_job(job_id, apply_counts).await
    }

    /// Move the item into `stage`'s working status.
    ///
    /// Returns `None` when the item is no longer where this stage expects it
    /// (a duplicate or stale task).
    async fn begin(
        &self,
        item: ImportItem,
        stage: Stage,
    ) -> Result<Option<ImportItem>, ImportError> {
        let working = stage.working_status();
        if item.status == working {
            // retry of this stage
            return Ok(Some(item));
        }
        if item.status != stage.entry_status() {
            debug!(
                "Ignoring {} for item {}: item is {}",
                stage, item.id, item.status
            );
            return Ok(None);
        }

        let job_id = item.job_id;
        match self
            .store
            .update_item(item.id, Box::new(move |item| transition(item, working)))
            .await
        {
            Ok(item) => {
                info!("Item {}: {} stage, now {}", item.id, stage, item.status);
                self.refresh(job_id).await?;
                Ok(Some(item))
            }
            Err(ImportError::InvalidTransition { from, .. }) => {
                debug!("Ignoring {} for item {}: item moved to {}", stage, item.id, from);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn parse(&self, item: ImportItem) -> Result<(), ImportError> {
        let Some(item) = self.begin(item, Stage::Parse).await? else {
            return Ok(());
        };

        let parsed = self.parser.parse(&item.source_reference).await?;
        let raw = serde_json::to_value(&parsed)?;
        self.store
            .update_item(
                item.id,
                Box::new(move |item| {
                    item.raw_data = Some(raw);
                    Ok(())
                }),
            )
            .await?;
        debug!("Parsed {}", item.source_reference.label());
        self.queue.enqueue(Stage::Extract, item.id)
    }

    async fn extract(&self, item: ImportItem) -> Result<(), ImportError> {
        let Some(item) = self.begin(item, Stage::Extract).await? else {
            return Ok(());
        };

        let raw = item.raw_data.clone().ok_or_else(|| {
            ImportError::extraction("missing_source", "item has no parsed source content")
        })?;
        let parsed: ParsedSource = serde_json::from_value(raw)?;
        let result = self
            .extractors
            .extract(&parsed.content, parsed.source_url.as_deref())
            .await;

        let cost = result.ai_cost_cents;
        let extractor_used = result.extractor_used.clone();
        let Some(recipe) = result.recipe.filter(|_| result.success) else {
            if cost > 0.0 {
                self.store
                    .update_item(
                        item.id,
                        Box::new(move |item| {
                            item.ai_cost_cents += cost;
                            item.extractor_used = extractor_used;
                            Ok(())
                        }),
                    )
                    .await?;
            }
            let code = result
                .error_code
                .unwrap_or_else(|| "extraction_failed".to_string());
            let message = result
                .error_message
                .unwrap_or_else(|| "No recipe could be extracted".to_string());
            return Err(if !result.retryable {
                ImportError::extraction(code, message)
            } else if code == "timeout" {
                ImportError::Timeout(self.ai_timeout)
            } else {
                ImportError::Llm(LlmError::RequestFailed(message))
            });
        };

        info!(
            "Extracted '{}' from {} with {}",
            recipe.title,
            item.source_reference.label(),
            extractor_used.as_deref().unwrap_or("unknown")
        );
        self.store
            .update_item(
                item.id,
                Box::new(move |item| {
                    item.parsed_recipe = Some(recipe);
                    item.extractor_used = extractor_used;
                    item.ai_cost_cents += cost;
                    Ok(())
                }),
            )
            .await?;
        self.queue.enqueue(Stage::Match, item.id)
    }

    async fn match_ingredients(&self, item: ImportItem) -> Result<(), ImportError> {
        let Some(item) = self.begin(item, Stage::Match).await? else {
            return Ok(());
        };

        let mut recipe = item
            .parsed_recipe
            .clone()
            .ok_or_else(|| ImportError::Matching("item has no extracted recipe".to_string()))?;

        let mut cost = 0.0;
        let mut failure = None;
        for ingredient in recipe.ingredients.iter_mut() {
            match self.matcher.match_ingredient(&ingredient.name).await {
                Ok(found) => {
                    cost += found.ai_cost_cents;
                    ingredient.ingredient_id = found.ingredient_id;
                    ingredient.match_confidence = Some(found.confidence);
                    ingredient.match_type = Some(found.match_type);
                    ingredient.needs_review = found.ingredient_id.is_none()
                        || found.confidence < self.review_threshold
                        || !found.match_type.is_authoritative();
                }
                Err(ImportError::NoMatch(_)) => {
                    ingredient.ingredient_id = None;
                    ingredient.match_confidence = None;
                    ingredient.match_type = None;
                    ingredient.needs_review = true;
                }
                Err(e) if e.is_retryable() => {
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    failure = Some(ImportError::Matching(format!(
                        "'{}': {}",
                        ingredient.name, e
                    )));
                    break;
                }
            }
        }

        // Earlier ingredients are cached now, so a retry won't pay for them again
        if let Some(e) = failure {
            if cost > 0.0 {
                self.store
                    .update_item(
                        item.id,
                        Box::new(move |item| {
                            item.ai_cost_cents += cost;
                            Ok(())
                        }),
                    )
                    .await?;
            }
            return Err(e);
        }

        let next = if recipe.needs_review() || !self.auto_approve {
            ItemStatus::AwaitingReview
        } else {
            ItemStatus::Approved
        };
        let item = self
            .store
            .update_item(
                item.id,
                Box::new(move |item| {
                    item.parsed_recipe = Some(recipe);
                    item.ai_cost_cents += cost;
                    transition(item, next)
                }),
            )
            .await?;
        self.refresh(item.job_id).await?;
        info!("Item {} matched, now {}", item.id, item.status);

        if next == ItemStatus::Approved {
            self.queue.enqueue(Stage::Create, item.id)?;
        }
        Ok(())
    }

    /// Materialize the approved item's recipe, user edits applied
    async fn create(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        let item = self.store.get_item(item_id).await?;
        if item.status != ItemStatus::Approved {
            return Err(ImportError::CreationConflict(format!(
                "item {} is {}, not approved",
                item_id, item.status
            )));
        }
        let job = self.store.get_job(item.job_id).await?;
        let draft = item
            .effective_recipe()
            .map_err(|e| ImportError::InvalidEdits(e.to_string()))?
            .ok_or_else(|| {
                ImportError::CreationConflict(format!("item {} has no extracted recipe", item_id))
            })?;

        let mut ingredients = Vec::with_capacity(draft.ingredients.len());
        for (position, ingredient) in draft.ingredients.into_iter().enumerate() {
            // cached decisions include corrections made during review
            let ingredient_id = self
                .matcher
                .cached_ingredient(&ingredient.name)
                .await?
                .or(ingredient.ingredient_id);
            ingredients.push(RecipeIngredient {
                position,
                ingredient_id,
                original_text: ingredient.original_text,
                quantity: ingredient.quantity,
                unit: ingredient.unit,
                name: ingredient.name,
                optional: ingredient.optional,
            });
        }

        let recipe = self
            .store
            .insert_recipe(Recipe {
                id: Uuid::new_v4(),
                import_item_id: item_id,
                owner_id: job.owner_id,
                collection_id: job.collection_id,
                title: draft.title,
                description: draft.description,
                instructions: draft.instructions,
                prep_time_minutes: draft.prep_time_minutes,
                cook_time_minutes: draft.cook_time_minutes,
                total_time_minutes: draft.total_time_minutes,
                servings: draft.servings,
                source_url: draft.source_url,
                image_url: draft.image_url,
                tags: draft.tags,
                ingredients,
                created_at: Utc::now(),
            })
            .await?;

        let recipe_id = recipe.id;
        let item = self
            .store
            .update_item(
                item_id,
                Box::new(move |item| {
                    transition(item, ItemStatus::Completed)?;
                    item.created_recipe_id = Some(recipe_id);
                    Ok(())
                }),
            )
            .await?;
        self.refresh(item.job_id).await?;
        info!("Created recipe {} '{}' from item {}", recipe_id, recipe.title, item_id);
        Ok(item)
    }

    async fn mark_failed(&self, item_id: Uuid, cause: &ImportError) {
        let code = cause.code().to_string();
        let message = cause.to_string();
        warn!("Item {} failed: {}", item_id, message);
        let result = self
            .store
            .update_item(
                item_id,
                Box::new(move |item| {
                    transition(item, ItemStatus::Failed)?;
                    item.error_code = Some(code);
                    item.error_message = Some(message);
                    Ok(())
                }),
            )
            .await;
        match result {
            Ok(item) => {
                if let Err(e) = self.refresh(item.job_id).await {
                    error!("Could not refresh job {}: {}", item.job_id, e);
                }
            }
            Err(e) => error!("Could not mark item {} failed: {}", item_id, e),
        }
    }
}

#[async_trait]
impl StageHandler for Orchestrator {
    async fn handle(&self, stage: Stage, item_id: Uuid) -> Result<(), ImportError> {
        let item = self.store.get_item(item_id).await?;
        let job = self.store.get_job(item.job_id).await?;
        if job.status == JobStatus::Cancelled {
            debug!("Job {} cancelled, dropping {} for item {}", job.id, stage, item_id);
            return Ok(());
        }

        match stage {
            Stage::Parse => self.parse(item).await,
            Stage::Extract => self.extract(item).await,
            Stage::Match => self.match_ingredients(item).await,
            Stage::Create => self.create(item_id).await.map(|_| ()),
        }
    }

    async fn fail(&self, stage: Stage, item_id: Uuid, error: ImportError) {
        if let ImportError::CreationConflict(_) = error {
            // another creator owns this item
            warn!("{} for item {} skipped: {}", stage, item_id, error);
            return;
        }
        self.mark_failed(item_id, &error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalIngredient, MatchType};
    use crate::pipeline::store::MemoryStore;
    use crate::providers::FakeProvider;
    use serde_json::json;

    fn config(auto_approve: bool) -> ImportConfig {
        let mut config = ImportConfig::default();
        config.pipeline.auto_approve = auto_approve;
        config.retry.initial_delay_ms = 5;
        config.timeouts.fetch_secs = 5;
        config.timeouts.ai_secs = 5;
        config
    }

    fn catalog() -> Arc<IngredientCatalog> {
        catalog_with(CanonicalIngredient::new("milk", &["whole milk"]))
    }

    fn catalog_with(milk: CanonicalIngredient) -> Arc<IngredientCatalog> {
        Arc::new(IngredientCatalog::new(vec![
            CanonicalIngredient::new("egg", &[]),
            milk,
            CanonicalIngredient::new("all-purpose flour", &["flour"]),
        ]))
    }

    fn spreadsheet(rows: &str) -> SourceInput {
        SourceInput::Spreadsheet {
            filename: Some("recipes.csv".to_string()),
            bytes: format!("title,ingredients,instructions\n{}", rows).into_bytes(),
        }
    }

    async fn run(
        orchestrator: &Orchestrator,
        source: SourceInput,
    ) -> (ImportJob, Vec<ImportItem>) {
        let job = orchestrator
            .start_import(source, Uuid::new_v4(), None)
            .await
            .unwrap();
        orchestrator.wait_idle().await;
        (
            orchestrator.get_job(job.id).await.unwrap(),
            orchestrator.list_items(job.id).await.unwrap(),
        )
    }

    fn orchestrator(auto_approve: bool, llm: Option<Arc<dyn LlmProvider>>) -> Arc<Orchestrator> {
        build(auto_approve, catalog(), llm, None)
    }

    fn build(
        auto_approve: bool,
        catalog: Arc<IngredientCatalog>,
        llm: Option<Arc<dyn LlmProvider>>,
        ocr: Option<Arc<OcrService>>,
    ) -> Arc<Orchestrator> {
        Orchestrator::new(
            &config(auto_approve),
            Arc::new(MemoryStore::new()),
            catalog,
            llm,
            ocr,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_confident_matches_are_created_automatically() {
        let orchestrator = orchestrator(true, None);
        let (job, items) = run(
            &orchestrator,
            spreadsheet("Pancakes,2 eggs; 1 cup milk; 2 cups flour,Mix | Fry\n"),
        )
        .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.succeeded_items, 1);
        assert_eq!(job.processed_items, 1);
        assert!(job.completed_at.is_some());

        let item = &items[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.extractor_used.as_deref(), Some("spreadsheet_row"));
        let recipe = orchestrator
            .store
            .get_recipe(item.created_recipe_id.unwrap())
            .await
            .unwrap();
        assert_eq!(recipe.title, "Pancakes");
        assert_eq!(recipe.ingredients.len(), 3);
        assert!(recipe.ingredients.iter().all(|i| i.ingredient_id.is_some()));
        assert_eq!(recipe.instructions, vec!["Mix", "Fry"]);
    }

    #[tokio::test]
    async fn test_unmatched_ingredient_waits_for_review() {
        let orchestrator = orchestrator(true, None);
        let (job, items) = run(&orchestrator, spreadsheet("Omelette,2 eggs; 1 pinch saffron,\n")).await;

        assert_eq!(job.status, JobStatus::AwaitingReview);
        assert_eq!(job.pending_review_items, 1);
        let recipe = items[0].parsed_recipe.as_ref().unwrap();
        let saffron = &recipe.ingredients[1];
        assert!(saffron.needs_review);
        assert_eq!(saffron.ingredient_id, None);
        assert_eq!(recipe.ingredients[0].match_type, Some(MatchType::Exact));
        assert!(!recipe.ingredients[0].needs_review);
    }

    #[tokio::test]
    async fn test_review_edit_and_approve() {
        let orchestrator = orchestrator(false, None);
        let (_, items) = run(&orchestrator, spreadsheet("Toast,1 slice bread,\n")).await;
        let item = &items[0];
        assert_eq!(item.status, ItemStatus::AwaitingReview);

        let mut edits = Map::new();
        edits.insert("title".to_string(), json!("Buttered Toast"));
        orchestrator.update_item(item.id, edits).await.unwrap();

        let mut bad = Map::new();
        bad.insert("servings".to_string(), json!("lots"));
        let err = orchestrator.update_item(item.id, bad).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidEdits(_)));

        let done = orchestrator.approve_item(item.id).await.unwrap();
        assert_eq!(done.status, ItemStatus::Completed);
        let recipe = orchestrator
            .store
            .get_recipe(done.created_recipe_id.unwrap())
            .await
            .unwrap();
        assert_eq!(recipe.title, "Buttered Toast");

        let err = orchestrator.approve_item(item.id).await.unwrap_err();
        assert!(matches!(err, ImportError::CreationConflict(_)));
        assert_eq!(orchestrator.store.recipe_count().await.unwrap(), 1);

        let mut late = Map::new();
        late.insert("title".to_string(), json!("Too late"));
        assert!(orchestrator.update_item(item.id, late).await.is_err());
    }

    #[tokio::test]
    async fn test_user_correction_is_used_at_creation() {
        let milk = CanonicalIngredient::new("milk", &[]);
        let milk_id = milk.id;
        let orchestrator = build(false, catalog_with(milk), None, None);
        let (_, items) = run(&orchestrator, spreadsheet("Risotto,1 pinch saffron,\n")).await;
        let item = &items[0];

        let saffron = CanonicalIngredient::new("saffron", &[]);
        // corrections must point at a catalog entry
        assert!(orchestrator
            .confirm_match("saffron", saffron.id, Uuid::new_v4())
            .await
            .is_err());

        orchestrator
            .confirm_match("saffron", milk_id, Uuid::new_v4())
            .await
            .unwrap();
        let done = orchestrator.approve_item(item.id).await.unwrap();
        let recipe = orchestrator
            .store
            .get_recipe(done.created_recipe_id.unwrap())
            .await
            .unwrap();
        assert_eq!(recipe.ingredients[0].ingredient_id, Some(milk_id));
    }

    #[tokio::test]
    async fn test_skip_and_cancel() {
        let orchestrator = orchestrator(false, None);
        let (job, items) = run(
            &orchestrator,
            spreadsheet("Toast,1 slice bread,\nTea,1 tea bag,\n"),
        )
        .await;
        assert_eq!(job.pending_review_items, 2);

        orchestrator.skip_item(items[0].id).await.unwrap();
        let job = orchestrator.get_job(job.id).await.unwrap();
        assert_eq!(job.skipped_items, 1);
        assert_eq!(job.status, JobStatus::AwaitingReview);

        let job = orchestrator.cancel_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        let err = orchestrator.approve_item(items[1].id).await.unwrap_err();
        assert!(matches!(err, ImportError::JobCancelled(_)));

        // counters keep moving, the status stays cancelled
        let job = orchestrator.refresh(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_bad_url_fails_and_can_be_retried() {
        let orchestrator = orchestrator(true, None);
        let (job, items) = run(&orchestrator, SourceInput::Url("not a url".to_string())).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_items, 1);
        assert_eq!(items[0].status, ItemStatus::Failed);
        assert_eq!(items[0].error_code.as_deref(), Some("invalid_source"));

        let item = orchestrator.retry_item(items[0].id).await.unwrap();
        assert_eq!(item.retry_count, 1);
        orchestrator.wait_idle().await;
        let item = orchestrator.get_item(item.id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.retry_count, 1);
    }

    #[tokio::test]
    async fn test_row_nobody_can_read_fails() {
        let fake = Arc::new(FakeProvider::new().with_default_response(json!({})));
        let orchestrator = orchestrator(true, Some(fake.clone()));
        let (job, items) = run(
            &orchestrator,
            SourceInput::Spreadsheet {
                filename: None,
                bytes: b"notes\nflatbread\n".to_vec(),
            },
        )
        .await;

        assert_eq!(job.failed_items, 1);
        assert_eq!(items[0].error_code.as_deref(), Some("no_extractor"));
        assert_eq!(fake.calls(), 0);
    }

    struct FixedText(&'static str);

    #[async_trait]
    impl crate::ocr::OcrEngine for FixedText {
        async fn extract_text(&self, _image: &[u8]) -> Result<String, ImportError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_ai_costs_roll_up_to_job() {
        let fake = Arc::new(
            FakeProvider::with_response(
                "Ingredient: water",
                json!({"ingredient_id": null, "confidence": 0.0}),
            )
            .and_response(
                "Text:",
                json!({
                    "title": "Flatbread",
                    "ingredients": ["2 cups flour", "1 cup water"],
                    "instructions": ["Knead", "Bake"],
                    "error": null
                }),
            )
            .with_cost(1.5),
        );
        let ocr = Arc::new(OcrService::with_engine(
            Arc::new(FixedText("Flatbread\n2 cups flour\n1 cup water\nKnead, then bake.")),
            Duration::from_secs(1),
        ));
        let orchestrator = build(true, catalog(), Some(fake.clone()), Some(ocr));

        let (job, items) = run(
            &orchestrator,
            SourceInput::ScannedPages {
                filename: Some("scan.pdf".to_string()),
                pages: vec![b"page one".to_vec()],
            },
        )
        .await;

        // one extraction call, one matching call for water
        assert_eq!(fake.calls(), 2);
        assert_eq!(items[0].extractor_used.as_deref(), Some("ai_text"));
        assert_eq!(items[0].ai_cost_cents, 3.0);
        assert_eq!(job.total_ai_cost_cents, 3.0);
        assert_eq!(job.status, JobStatus::AwaitingReview);

        let recipe = items[0].parsed_recipe.as_ref().unwrap();
        assert_eq!(recipe.ingredients[0].match_type, Some(MatchType::Exact));
        assert_eq!(recipe.ingredients[1].match_type, Some(MatchType::Ai));
        assert!(recipe.ingredients[1].needs_review);
    }

    /// Drops the first matching call for one ingredient, answers everything else
    struct FlakyOn {
        ingredient: &'static str,
        tripped: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl LlmProvider for FlakyOn {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            prompt: &str,
            _schema: &serde_json::Value,
        ) -> Result<crate::providers::Completion, LlmError> {
            use std::sync::atomic::Ordering;
            let target = format!("Ingredient: {}", self.ingredient);
            if prompt.contains(&target) && !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(LlmError::RequestFailed("connection reset".to_string()));
            }
            Ok(crate::providers::Completion {
                value: json!({"ingredient_id": null, "confidence": 0.0}),
                cost_cents: 1.0,
            })
        }
    }

    #[tokio::test]
    async fn test_matching_cost_survives_a_retry() {
        let flaky = Arc::new(FlakyOn {
            ingredient: "saffron",
            tripped: std::sync::atomic::AtomicBool::new(false),
        });
        let orchestrator = orchestrator(true, Some(flaky));
        let (job, items) = run(
            &orchestrator,
            spreadsheet("Saffron Water,1 cup water; 1 pinch saffron,Stir\n"),
        )
        .await;

        // water was paid for on the failed attempt and served from cache on the retry
        assert_eq!(items[0].ai_cost_cents, 2.0);
        assert_eq!(job.total_ai_cost_cents, 2.0);
        assert_eq!(job.status, JobStatus::AwaitingReview);
    }

    /// Reads nothing from any page
    #[derive(Default)]
    struct BlankPage {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl crate::ocr::OcrEngine for BlankPage {
        async fn extract_text(&self, _image: &[u8]) -> Result<String, ImportError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("  \n ".to_string())
        }
    }

    #[tokio::test]
    async fn test_blank_page_is_not_retried() {
        let engine = Arc::new(BlankPage::default());
        let ocr = Arc::new(OcrService::with_engine(engine.clone(), Duration::from_secs(1)));
        let orchestrator = build(true, catalog(), None, Some(ocr));

        let (job, items) = run(
            &orchestrator,
            SourceInput::ScannedPages {
                filename: None,
                pages: vec![b"blank".to_vec()],
            },
        )
        .await;

        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(items[0].status, ItemStatus::Failed);
        assert_eq!(items[0].error_code.as_deref(), Some("ocr_failed"));
        assert_eq!(job.failed_items, 1);
    }

    /// Holds every page until the test lets it go
    #[derive(Default)]
    struct HeldPage {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl crate::ocr::OcrEngine for HeldPage {
        async fn extract_text(&self, _image: &[u8]) -> Result<String, ImportError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("Flatbread\n2 cups flour\n1 cup water\nKnead, then bake.".to_string())
        }
    }

    #[tokio::test]
    async fn test_cancel_while_parsing_stops_later_stages() {
        let engine = Arc::new(HeldPage::default());
        let ocr = Arc::new(OcrService::with_engine(engine.clone(), Duration::from_secs(5)));
        let fake = Arc::new(FakeProvider::new().with_default_response(json!({
            "title": "Flatbread",
            "ingredients": ["2 cups flour"],
            "instructions": ["Bake"],
            "error": null
        })));
        let orchestrator = build(true, catalog(), Some(fake.clone()), Some(ocr));

        let job = orchestrator
            .start_import(
                SourceInput::ScannedPages {
                    filename: None,
                    pages: vec![b"page one".to_vec()],
                },
                Uuid::new_v4(),
                None,
            )
            .await
            .unwrap();

        engine.started.notified().await;
        let cancelled = orchestrator.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        engine.release.notify_one();
        orchestrator.wait_idle().await;

        // the page finished parsing but nothing after it ran
        assert_eq!(fake.calls(), 0);
        let item = &orchestrator.list_items(job.id).await.unwrap()[0];
        assert_eq!(item.status, ItemStatus::Parsing);
        assert!(item.parsed_recipe.is_none());
        assert_eq!(orchestrator.store.recipe_count().await.unwrap(), 0);

        let job = orchestrator.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
