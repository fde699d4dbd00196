//! Persistence boundary for jobs, items, the ingredient-match cache and
//! created recipes.
//!
//! Backends only need to provide the atomic primitives below; the pipeline
//! never does a blind read-then-write on shared rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ImportError;
use crate::model::{ImportItem, ImportJob, IngredientMatch, Recipe};
use crate::pipeline::state::StatusCounts;

/// Read-modify-write closure applied to one item under the store's lock.
/// Returning an error leaves the stored item untouched.
pub type ItemUpdate = Box<dyn FnOnce(&mut ImportItem) -> Result<(), ImportError> + Send>;

pub type JobUpdate = Box<dyn FnOnce(&mut ImportJob) -> Result<(), ImportError> + Send>;

/// Recomputes a job from its item counts
pub type JobRefresh = fn(&mut ImportJob, &StatusCounts);

/// How an ingredient-match upsert treats an existing row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Automated matchers never replace a user-confirmed decision
    Automated,
    /// User corrections and invalidations always win
    UserConfirmed,
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn insert_job(&self, job: ImportJob, items: Vec<ImportItem>) -> Result<(), ImportError>;

    async fn get_job(&self, job_id: Uuid) -> Result<ImportJob, ImportError>;

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<ImportJob, ImportError>;

    /// Count the job's items by status and apply `refresh` in one critical section.
    async fn refresh_job(&self, job_id: Uuid, refresh: JobRefresh)
        -> Result<ImportJob, ImportError>;

    async fn get_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError>;

    /// Items of a job in creation order
    async fn list_items(&self, job_id: Uuid) -> Result<Vec<ImportItem>, ImportError>;

    async fn update_item(&self, item_id: Uuid, update: ItemUpdate)
        -> Result<ImportItem, ImportError>;

    async fn get_match(&self, normalized: &str) -> Result<Option<IngredientMatch>, ImportError>;

    /// Insert or overwrite the row keyed by `source_text_normalized`.
    /// Returns the row as stored, which is the existing one when the policy
    /// refused the write.
    async fn upsert_match(
        &self,
        entry: IngredientMatch,
        policy: UpsertPolicy,
    ) -> Result<IngredientMatch, ImportError>;

    /// Insert a recipe; a second recipe for the same item is a `CreationConflict`.
    async fn insert_recipe(&self, recipe: Recipe) -> Result<Recipe, ImportError>;

    async fn get_recipe(&self, recipe_id: Uuid) -> Result<Recipe, ImportError>;

    async fn recipe_count(&self) -> Result<usize, ImportError>;
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, ImportJob>,
    items: HashMap<Uuid, ImportItem>,
    job_items: HashMap<Uuid, Vec<Uuid>>,
    matches: HashMap<String, IngredientMatch>,
    recipes: HashMap<Uuid, Recipe>,
    recipe_by_item: HashMap<Uuid, Uuid>,
}

/// In-memory store. State is not persisted across restarts.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn insert_job(&self, job: ImportJob, items: Vec<ImportItem>) -> Result<(), ImportError> {
        let mut tables = self.tables.write().await;
        let ids = items.iter().map(|i| i.id).collect();
        tables.job_items.insert(job.id, ids);
        for item in items {
            tables.items.insert(item.id, item);
        }
        tables.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let tables = self.tables.read().await;
        tables
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(format!("job {}", job_id)))
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<ImportJob, ImportError> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ImportError::NotFound(format!("job {}", job_id)))?;
        let mut next = job.clone();
        update(&mut next)?;
        *job = next.clone();
        Ok(next)
    }

    async fn refresh_job(
        &self,
        job_id: Uuid,
        refresh: JobRefresh,
    ) -> Result<ImportJob, ImportError> {
        let mut tables = self.tables.write().await;
        let counts = {
            let ids = tables
                .job_items
                .get(&job_id)
                .ok_or_else(|| ImportError::NotFound(format!("job {}", job_id)))?;
            StatusCounts::from_items(ids.iter().filter_map(|id| tables.items.get(id)))
        };
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ImportError::NotFound(format!("job {}", job_id)))?;
        refresh(job, &counts);
        debug!(
            "Job {} refreshed: {:?} ({} succeeded, {} failed, {} awaiting review)",
            job_id, job.status, job.succeeded_items, job.failed_items, job.pending_review_items
        );
        Ok(job.clone())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<ImportItem, ImportError> {
        let tables = self.tables.read().await;
        tables
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(format!("item {}", item_id)))
    }

    async fn list_items(&self, job_id: Uuid) -> Result<Vec<ImportItem>, ImportError> {
        let tables = self.tables.read().await;
        let ids = tables
            .job_items
            .get(&job_id)
            .ok_or_else(|| ImportError::NotFound(format!("job {}", job_id)))?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn update_item(
        &self,
        item_id: Uuid,
        update: ItemUpdate,
    ) -> Result<ImportItem, ImportError> {
        let mut tables = self.tables.write().await;
        let item = tables
            .items
            .get_mut(&item_id)
            .ok_or_else(|| ImportError::NotFound(format!("item {}", item_id)))?;
        let mut next = item.clone();
        update(&mut next)?;
        next.updated_at = Utc::now();
        *item = next.clone();
        Ok(next)
    }

    async fn get_match(&self, normalized: &str) -> Result<Option<IngredientMatch>, ImportError> {
        let tables = self.tables.read().await;
        Ok(tables.matches.get(normalized).cloned())
    }

    async fn upsert_match(
        &self,
        entry: IngredientMatch,
        policy: UpsertPolicy,
    ) -> Result<IngredientMatch, ImportError> {
        let mut tables = self.tables.write().await;
        if policy == UpsertPolicy::Automated {
            if let Some(existing) = tables.matches.get(&entry.source_text_normalized) {
                if existing.user_confirmed == Some(true) {
                    debug!(
                        "Keeping user-confirmed match for '{}'",
                        entry.source_text_normalized
                    );
                    return Ok(existing.clone());
                }
            }
        }
        tables
            .matches
            .insert(entry.source_text_normalized.clone(), entry.clone());
        Ok(entry)
    }

    async fn insert_recipe(&self, recipe: Recipe) -> Result<Recipe, ImportError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.recipe_by_item.get(&recipe.import_item_id) {
            return Err(ImportError::CreationConflict(format!(
                "item {} already produced recipe {}",
                recipe.import_item_id, existing
            )));
        }
        tables
            .recipe_by_item
            .insert(recipe.import_item_id, recipe.id);
        tables.recipes.insert(recipe.id, recipe.clone());
        Ok(recipe)
    }

    async fn get_recipe(&self, recipe_id: Uuid) -> Result<Recipe, ImportError> {
        let tables = self.tables.read().await;
        tables
            .recipes
            .get(&recipe_id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(format!("recipe {}", recipe_id)))
    }

    async fn recipe_count(&self) -> Result<usize, ImportError> {
        Ok(self.tables.read().await.recipes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemStatus, JobStatus, MatchType, SourceReference, SourceType};
    use crate::pipeline::state::apply_counts;
    use std::sync::Arc;

    fn job_with_items(n: usize) -> (ImportJob, Vec<ImportItem>) {
        let job = ImportJob::new(SourceType::UrlList, None, Uuid::new_v4(), None, n);
        let items = (0..n)
            .map(|i| {
                ImportItem::new(
                    job.id,
                    SourceReference::Url {
                        url: format!("https://example.com/{}", i),
                    },
                )
            })
            .collect();
        (job, items)
    }

    fn cache_row(key: &str, confirmed: Option<bool>) -> IngredientMatch {
        IngredientMatch {
            source_text: key.to_string(),
            source_text_normalized: key.to_string(),
            matched_ingredient_id: Some(Uuid::new_v4()),
            match_type: MatchType::Fuzzy,
            confidence: 0.85,
            user_confirmed: confirmed,
            confirmed_by: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failed_update_leaves_item_untouched() {
        let store = MemoryStore::new();
        let (job, items) = job_with_items(1);
        let item_id = items[0].id;
        store.insert_job(job, items).await.unwrap();

        let result = store
            .update_item(
                item_id,
                Box::new(|item| {
                    item.retry_count = 9;
                    Err(ImportError::InvalidEdits("nope".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_item(item_id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_converge() {
        let store = Arc::new(MemoryStore::new());
        let (job, items) = job_with_items(8);
        let job_id = job.id;
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        store.insert_job(job, items).await.unwrap();

        let mut handles = Vec::new();
        for id in ids {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_item(
                        id,
                        Box::new(|item| {
                            item.status = ItemStatus::Completed;
                            Ok(())
                        }),
                    )
                    .await
                    .unwrap();
                store.refresh_job(job_id, apply_counts).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.succeeded_items, 8);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_automated_upsert_keeps_user_decision() {
        let store = MemoryStore::new();
        let confirmed = cache_row("basil", Some(true));
        store
            .upsert_match(confirmed.clone(), UpsertPolicy::UserConfirmed)
            .await
            .unwrap();

        let stored = store
            .upsert_match(cache_row("basil", None), UpsertPolicy::Automated)
            .await
            .unwrap();
        assert_eq!(stored, confirmed);
        assert_eq!(store.get_match("basil").await.unwrap(), Some(confirmed));

        let invalidated = cache_row("basil", Some(false));
        store
            .upsert_match(invalidated.clone(), UpsertPolicy::UserConfirmed)
            .await
            .unwrap();
        let replacement = cache_row("basil", None);
        let stored = store
            .upsert_match(replacement.clone(), UpsertPolicy::Automated)
            .await
            .unwrap();
        assert_eq!(stored, replacement);
    }

    #[tokio::test]
    async fn test_second_recipe_for_item_conflicts() {
        let store = MemoryStore::new();
        let item_id = Uuid::new_v4();
        let recipe = Recipe {
            id: Uuid::new_v4(),
            import_item_id: item_id,
            owner_id: Uuid::new_v4(),
            collection_id: None,
            title: "Soup".to_string(),
            description: None,
            instructions: vec![],
            prep_time_minutes: None,
            cook_time_minutes: None,
            total_time_minutes: None,
            servings: None,
            source_url: None,
            image_url: None,
            tags: vec![],
            ingredients: vec![],
            created_at: Utc::now(),
        };
        store.insert_recipe(recipe.clone()).await.unwrap();

        let mut again = recipe;
        again.id = Uuid::new_v4();
        let err = store.insert_recipe(again).await.unwrap_err();
        assert!(matches!(err, ImportError::CreationConflict(_)));
        assert_eq!(store.recipe_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_job(Uuid::new_v4()).await,
            Err(ImportError::NotFound(_))
        ));
        assert!(store.get_match("nothing").await.unwrap().is_none());
    }
}
