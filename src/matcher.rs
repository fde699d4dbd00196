//! Ingredient matching: cache, then exact, fuzzy and finally AI resolution
//! against the canonical ingredient catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::ImportError;
use crate::model::{CanonicalIngredient, IngredientMatch, MatchType};
use crate::normalizer::normalize;
use crate::pipeline::store::{ImportStore, UpsertPolicy};
use crate::providers::{build_matching_prompt, matching_schema, LlmProvider};

/// Canonical ingredients indexed by normalized name and alias
#[derive(Debug, Default)]
pub struct IngredientCatalog {
    ingredients: HashMap<Uuid, CanonicalIngredient>,
    /// Normalized name or alias -> id, in catalog order
    keys: Vec<(String, Uuid)>,
}

impl IngredientCatalog {
    pub fn new(ingredients: Vec<CanonicalIngredient>) -> Self {
        let mut keys = Vec::new();
        for ingredient in &ingredients {
            for name in std::iter::once(&ingredient.name).chain(ingredient.aliases.iter()) {
                let key = normalize(name);
                if !key.is_empty() && !keys.iter().any(|(k, _)| *k == key) {
                    keys.push((key, ingredient.id));
                }
            }
        }
        IngredientCatalog {
            ingredients: ingredients.into_iter().map(|i| (i.id, i)).collect(),
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.ingredients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ingredients.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&CanonicalIngredient> {
        self.ingredients.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ingredients.contains_key(&id)
    }

    fn exact(&self, normalized: &str) -> Option<Uuid> {
        self.keys
            .iter()
            .find(|(key, _)| key == normalized)
            .map(|(_, id)| *id)
    }

    /// Most similar catalog entry; the first one wins ties
    fn best_fuzzy(&self, normalized: &str) -> Option<(Uuid, f64)> {
        let mut best: Option<(Uuid, f64)> = None;
        for (key, id) in &self.keys {
            let score = normalized_levenshtein(normalized, key);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*id, score));
            }
        }
        best
    }

    /// One line per ingredient for the matching prompt: `id: name (aliases)`
    fn prompt_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .ingredients
            .values()
            .map(|i| {
                if i.aliases.is_empty() {
                    format!("{}: {}", i.id, i.name)
                } else {
                    format!("{}: {} ({})", i.id, i.name, i.aliases.join(", "))
                }
            })
            .collect();
        lines.sort();
        lines
    }
}

/// Outcome of resolving one ingredient mention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// `None` when the AI looked and found no catalog entry
    pub ingredient_id: Option<Uuid>,
    pub match_type: MatchType,
    pub confidence: f64,
    /// Cost of this call only; cache hits are free
    pub ai_cost_cents: f64,
    pub cached: bool,
}

impl MatchResult {
    fn from_row(row: &IngredientMatch, cached: bool, ai_cost_cents: f64) -> Self {
        MatchResult {
            ingredient_id: row.matched_ingredient_id,
            match_type: row.match_type,
            confidence: row.confidence,
            ai_cost_cents,
            cached,
        }
    }
}

pub struct IngredientMatcher {
    catalog: Arc<IngredientCatalog>,
    store: Arc<dyn ImportStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: MatchingConfig,
    ai_timeout: Duration,
}

impl IngredientMatcher {
    pub fn new(
        catalog: Arc<IngredientCatalog>,
        store: Arc<dyn ImportStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: MatchingConfig,
        ai_timeout: Duration,
    ) -> Self {
        IngredientMatcher {
            catalog,
            store,
            llm,
            config,
            ai_timeout,
        }
    }

    pub fn catalog(&self) -> &IngredientCatalog {
        &self.catalog
    }

    /// Resolve `raw_text` to a canonical ingredient.
    ///
    /// Fails with `NoMatch` when neither the exact nor the fuzzy tier finds a
    /// candidate and AI fallback is unavailable.
    pub async fn match_ingredient(&self, raw_text: &str) -> Result<MatchResult, ImportError> {
        let key = normalize(raw_text);
        if key.trim().is_empty() {
            return Err(ImportError::NoMatch(raw_text.to_string()));
        }

        if let Some(row) = self.store.get_match(&key).await? {
            if self.is_fresh(&row) {
                debug!("Cache hit for '{}' ({:?})", key, row.match_type);
                return Ok(MatchResult::from_row(&row, true, 0.0));
            }
            debug!("Ignoring stale cache row for '{}'", key);
        }

        if let Some(id) = self.catalog.exact(&key) {
            return self
                .remember(raw_text, &key, Some(id), MatchType::Exact, 1.0, 0.0)
                .await;
        }

        if let Some((id, score)) = self.catalog.best_fuzzy(&key) {
            if score >= self.config.fuzzy_threshold {
                return self
                    .remember(raw_text, &key, Some(id), MatchType::Fuzzy, score, 0.0)
                    .await;
            }
        }

        let llm = match &self.llm {
            Some(llm) if self.config.ai_fallback && !self.catalog.is_empty() => llm,
            _ => return Err(ImportError::NoMatch(raw_text.to_string())),
        };

        let prompt = build_matching_prompt(raw_text, &self.catalog.prompt_lines());
        let completion = tokio::time::timeout(self.ai_timeout, llm.complete(&prompt, &matching_schema()))
            .await
            .map_err(|_| ImportError::Timeout(self.ai_timeout))??;

        let (id, confidence) = self.read_ai_answer(&completion.value);
        info!(
            "AI matched '{}' -> {:?} ({:.2}, {:.4} cents)",
            key, id, confidence, completion.cost_cents
        );
        self.remember(raw_text, &key, id, MatchType::Ai, confidence, completion.cost_cents)
            .await
    }

    /// Record a user's correction; it outranks every automated decision.
    pub async fn confirm_match(
        &self,
        raw_text: &str,
        ingredient_id: Uuid,
        user_id: Uuid,
    ) -> Result<IngredientMatch, ImportError> {
        if !self.catalog.contains(ingredient_id) {
            return Err(ImportError::NotFound(format!("ingredient {}", ingredient_id)));
        }
        let row = IngredientMatch {
            source_text: raw_text.to_string(),
            source_text_normalized: normalize(raw_text),
            matched_ingredient_id: Some(ingredient_id),
            match_type: MatchType::UserSelected,
            confidence: 1.0,
            user_confirmed: Some(true),
            confirmed_by: Some(user_id),
            updated_at: Utc::now(),
        };
        self.store.upsert_match(row, UpsertPolicy::UserConfirmed).await
    }

    /// Mark the cached decision for `raw_text` stale so the next lookup re-matches.
    pub async fn invalidate_match(&self, raw_text: &str) -> Result<IngredientMatch, ImportError> {
        let key = normalize(raw_text);
        let mut row = self
            .store
            .get_match(&key)
            .await?
            .ok_or_else(|| ImportError::NotFound(format!("ingredient match '{}'", key)))?;
        row.user_confirmed = Some(false);
        row.updated_at = Utc::now();
        self.store.upsert_match(row, UpsertPolicy::UserConfirmed).await
    }

    /// The cached decision for `raw_text`, without matching anything new
    pub async fn cached_ingredient(&self, raw_text: &str) -> Result<Option<Uuid>, ImportError> {
        let row = self.store.get_match(&normalize(raw_text)).await?;
        Ok(row
            .filter(|row| self.is_fresh(row))
            .and_then(|row| row.matched_ingredient_id))
    }

    fn is_fresh(&self, row: &IngredientMatch) -> bool {
        if row.user_confirmed == Some(false) {
            return false;
        }
        row.matched_ingredient_id
            .map_or(true, |id| self.catalog.contains(id))
    }

    fn read_ai_answer(&self, value: &serde_json::Value) -> (Option<Uuid>, f64) {
        let id = value["ingredient_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s.trim()).ok());
        let id = match id {
            Some(id) if self.catalog.contains(id) => Some(id),
            Some(id) => {
                warn!("AI proposed unknown ingredient id {}", id);
                None
            }
            None => None,
        };
        let confidence = match id {
            Some(_) => value["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
            None => 0.0,
        };
        (id, confidence)
    }

    async fn remember(
        &self,
        raw_text: &str,
        key: &str,
        ingredient_id: Option<Uuid>,
        match_type: MatchType,
        confidence: f64,
        ai_cost_cents: f64,
    ) -> Result<MatchResult, ImportError> {
        let row = IngredientMatch {
            source_text: raw_text.to_string(),
            source_text_normalized: key.to_string(),
            matched_ingredient_id: ingredient_id,
            match_type,
            confidence,
            user_confirmed: None,
            confirmed_by: None,
            updated_at: Utc::now(),
        };
        // A user confirmation may already own the key
        let stored = self
            .store
            .upsert_match(row.clone(), UpsertPolicy::Automated)
            .await?;
        if !self.is_fresh(&stored) {
            // the confirmed ingredient left the catalog; answer without caching
            debug!("Confirmed match for '{}' is stale, not overwriting it", key);
            return Ok(MatchResult::from_row(&row, false, ai_cost_cents));
        }
        Ok(MatchResult::from_row(&stored, false, ai_cost_cents))
    }
}
