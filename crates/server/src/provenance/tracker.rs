// crates/server/src/provenance/tracker.rs
//! Provenance & Policy Layer — Provenance Tracker (spec.md 4.M).
//!
//! Logs every generation as a run in an [`ExperimentStore`], and supports
//! drift detection (has a category definition changed since a recipe with
//! the same `recipe_hash` last ran?) and top-rated recipe lookup. Logging
//! is always best-effort: a store failure is logged and swallowed rather
//! than surfaced to the caller, since provenance is a side channel to
//! generation, never a blocking dependency.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use comfygen_core::{Category, Recipe};

use super::store::{ExperimentStore, RunFilter, RunRecord};

#[derive(Serialize)]
struct CanonicalCategory<'a> {
    id: &'a str,
    primary: Vec<&'a str>,
    specific: Vec<&'a str>,
    secondary: Vec<&'a str>,
    positive_required: Vec<&'a str>,
    positive_optional: Vec<&'a str>,
    negative_required: Vec<&'a str>,
    negative_optional: Vec<&'a str>,
    loras: Vec<&'a str>,
}

fn sorted<'a>(items: &'a [String]) -> Vec<&'a str> {
    let mut v: Vec<&str> = items.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

/// Truncate `s` to at most `max_chars` characters, respecting char
/// boundaries (prompts/feedback may contain multi-byte text).
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Hash of the keyword/prompt/lora sections of each referenced category
/// definition, stable under field reordering in the source YAML. Used to
/// detect "this category changed shape since the recipe was last produced".
pub fn category_hash(categories: &[&Category]) -> String {
    let mut sorted_categories = categories.to_vec();
    sorted_categories.sort_by(|a, b| a.id.cmp(&b.id));

    let canonical: Vec<CanonicalCategory> = sorted_categories
        .iter()
        .map(|c| {
            let mut loras: Vec<&str> = c
                .loras
                .required
                .iter()
                .chain(c.loras.recommended.iter())
                .map(|l| l.filename.as_str())
                .collect();
            loras.sort_unstable();
            CanonicalCategory {
                id: &c.id,
                primary: sorted(&c.keywords.primary),
                specific: sorted(&c.keywords.specific),
                secondary: sorted(&c.keywords.secondary),
                positive_required: sorted(&c.prompts.positive.required),
                positive_optional: sorted(&c.prompts.positive.optional),
                negative_required: sorted(&c.prompts.negative.required),
                negative_optional: sorted(&c.prompts.negative.optional),
                loras,
            }
        })
        .collect();

    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Hash over both `recipe_hash` and `category_hash`, identifying a recipe
/// tied to the exact category definitions that produced it.
pub fn combined_hash(recipe_hash: &str, category_hash: &str) -> String {
    let digest = Sha256::digest(format!("{recipe_hash}:{category_hash}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[derive(Debug, Clone)]
pub struct ProvenanceRecord {
    pub run_id: String,
    pub recipe_hash: String,
    pub category_hash: String,
    pub combined_hash: String,
    pub artifact_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DriftResult {
    /// No prior run shares this recipe's hash, so nothing to compare.
    NoPriorRun,
    /// The referenced categories are unchanged since the last run with
    /// this `recipe_hash`.
    Unchanged,
    /// A prior run with the same `recipe_hash` was produced from a
    /// different `category_hash` — at least one referenced category was
    /// edited since.
    Diverged { prior_run_id: String, prior_category_hash: String },
}

pub struct ProvenanceTracker {
    store: Arc<dyn ExperimentStore>,
    experiment_id: tokio::sync::OnceCell<String>,
    experiment_name: String,
}

impl ProvenanceTracker {
    pub fn new(store: Arc<dyn ExperimentStore>, experiment_name: impl Into<String>) -> Self {
        Self {
            store,
            experiment_id: tokio::sync::OnceCell::new(),
            experiment_name: experiment_name.into(),
        }
    }

    async fn experiment_id(&self) -> Option<&str> {
        self.experiment_id
            .get_or_try_init(|| async { self.store.create_experiment(&self.experiment_name).await })
            .await
            .map(String::as_str)
            .ok()
    }

    /// Log a completed generation. Returns `None` (and logs a warning) if
    /// the store is unavailable or the write failed for any reason.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        recipe: &Recipe,
        categories: &[&Category],
        artifact_ref: Option<&str>,
        elapsed_secs: f64,
        rating: Option<u8>,
        feedback: Option<&str>,
    ) -> Option<ProvenanceRecord> {
        let experiment_id = self.experiment_id().await?;
        let run_id = match self.store.create_run(experiment_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "provenance store unavailable, skipping run log");
                return None;
            }
        };

        let recipe_hash = recipe.recipe_hash();
        let cat_hash = category_hash(categories);
        let combined = combined_hash(&recipe_hash, &cat_hash);

        let mut tags = HashMap::from([
            ("recipe_hash".to_string(), recipe_hash.clone()),
            ("category_hash".to_string(), cat_hash.clone()),
            ("combined_hash".to_string(), combined.clone()),
            ("workflow".to_string(), recipe.workflow.clone()),
            ("source_categories".to_string(), recipe.source_categories.join(",")),
            ("generation_id".to_string(), recipe.id.clone()),
        ]);
        if let Some(artifact) = artifact_ref {
            tags.insert("artifact_url".to_string(), artifact.to_string());
        }
        if let Some(r) = rating {
            tags.insert("rating".to_string(), r.to_string());
        }
        if let Some(f) = feedback {
            tags.insert("feedback".to_string(), truncate_chars(f, 500));
        }

        let mut params = HashMap::from([
            ("workflow".to_string(), recipe.workflow.clone()),
            ("steps".to_string(), recipe.steps.to_string()),
            ("cfg".to_string(), recipe.cfg.to_string()),
            ("dimensions".to_string(), format!("{}x{}", recipe.width, recipe.height)),
            ("checkpoint".to_string(), recipe.checkpoint.clone().unwrap_or_else(|| "default".to_string())),
            ("lora_count".to_string(), recipe.loras.len().to_string()),
            ("category_count".to_string(), categories.len().to_string()),
            ("positive_prompt".to_string(), truncate_chars(&recipe.positive_prompt, 250)),
            ("negative_prompt".to_string(), truncate_chars(&recipe.negative_prompt, 250)),
        ]);
        for (i, lora) in recipe.loras.iter().take(5).enumerate() {
            params.insert(format!("lora_{i}_name"), lora.filename.clone());
            params.insert(format!("lora_{i}_strength"), lora.strength.to_string());
        }

        let mut metrics = HashMap::from([("elapsed_secs".to_string(), elapsed_secs)]);
        if let Some(r) = rating {
            metrics.insert("rating".to_string(), f64::from(r));
        }

        if let Err(e) = self.store.log_tags(&run_id, tags).await {
            tracing::warn!(error = %e, run_id, "failed to log provenance tags");
        }
        if let Err(e) = self.store.log_params(&run_id, params).await {
            tracing::warn!(error = %e, run_id, "failed to log provenance params");
        }
        if let Err(e) = self.store.log_metrics(&run_id, metrics).await {
            tracing::warn!(error = %e, run_id, "failed to log provenance metrics");
        }
        if let Ok(recipe_json) = serde_json::to_vec(recipe) {
            if let Err(e) = self.store.attach_artifact(&run_id, "recipe.json", recipe_json).await {
                tracing::warn!(error = %e, run_id, "failed to attach recipe artifact");
            }
        }

        Some(ProvenanceRecord {
            run_id,
            recipe_hash,
            category_hash: cat_hash,
            combined_hash: combined,
            artifact_ref: artifact_ref.map(str::to_string),
        })
    }

    /// Check whether any prior run shares this recipe's hash, and if so
    /// whether the referenced categories have since changed shape.
    pub async fn drift_check(&self, recipe: &Recipe, categories: &[&Category]) -> DriftResult {
        let recipe_hash = recipe.recipe_hash();
        let current_category_hash = category_hash(categories);

        let filter = RunFilter {
            tag_equals: vec![("recipe_hash".to_string(), recipe_hash)],
            min_rating: None,
            limit: 1,
        };

        let runs = match self.store.search_runs(&filter).await {
            Ok(runs) => runs,
            Err(_) => return DriftResult::NoPriorRun,
        };

        let Some(prior) = runs.into_iter().next() else {
            return DriftResult::NoPriorRun;
        };

        let prior_category_hash = prior.tags.get("category_hash").cloned().unwrap_or_default();
        if prior_category_hash == current_category_hash {
            DriftResult::Unchanged
        } else {
            DriftResult::Diverged {
                prior_run_id: prior.run_id,
                prior_category_hash,
            }
        }
    }

    /// Runs tagged with a rating at or above `min_rating`, most recent
    /// first, capped at `limit`.
    pub async fn top_rated(&self, min_rating: u8, limit: usize) -> Vec<RunRecord> {
        let filter = RunFilter {
            tag_equals: Vec::new(),
            min_rating: Some(min_rating),
            limit,
        };
        self.store.search_runs(&filter).await.unwrap_or_default()
    }

    pub async fn rate_run(&self, run_id: &str, rating: u8) -> Result<(), super::store::ProvenanceError> {
        self.store
            .log_tags(run_id, HashMap::from([("rating".to_string(), rating.to_string())]))
            .await
    }

    pub async fn favorite_run(&self, run_id: &str) -> Result<(), super::store::ProvenanceError> {
        self.store
            .log_tags(run_id, HashMap::from([("favorite".to_string(), "true".to_string())]))
            .await
    }

    pub async fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.store.get_run(run_id).await.ok().flatten()
    }

    pub async fn recipe_artifact(&self, run_id: &str) -> Option<Vec<u8>> {
        self.store.get_artifact(run_id, "recipe.json").await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::store::InMemoryExperimentStore;
    use comfygen_core::recipe::{CompositionStep, RecipeLora};
    use comfygen_core::{Category, CategoryType};

    fn sample_recipe() -> Recipe {
        Recipe {
            id: "abc".into(),
            source_categories: vec!["portrait".into()],
            positive_prompt: "a cat".into(),
            negative_prompt: "blurry".into(),
            loras: Vec::<RecipeLora>::new(),
            steps: 25,
            cfg: 6.0,
            width: 768,
            height: 768,
            sampler: Some("euler".into()),
            scheduler: Some("normal".into()),
            denoise: Some(0.8),
            checkpoint: None,
            vae: None,
            workflow: "flux-dev.json".into(),
            composition_steps: Vec::<CompositionStep>::new(),
            warnings: vec![],
        }
    }

    fn sample_category(id: &str, primary_keyword: &str) -> Category {
        let yaml = format!(
            "id: {id}\ntype: subject\ndisplay_name: Test\nkeywords:\n  primary: [{primary_keyword}]\n",
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn category_hash_changes_when_keywords_change() {
        let a = sample_category("portrait", "face");
        let b = sample_category("portrait", "headshot");
        assert_ne!(category_hash(&[&a]), category_hash(&[&b]));
    }

    #[test]
    fn category_hash_is_order_independent() {
        let a = sample_category("portrait", "face");
        let b = sample_category("landscape", "scenery");
        assert_eq!(category_hash(&[&a, &b]), category_hash(&[&b, &a]));
    }

    #[tokio::test]
    async fn log_then_drift_check_reports_unchanged() {
        let store = Arc::new(InMemoryExperimentStore::new());
        let tracker = ProvenanceTracker::new(store, "comfygen-test");
        let recipe = sample_recipe();
        let category = sample_category("portrait", "face");
        let categories = vec![&category];

        let record = tracker.log(&recipe, &categories, Some("file:///a.png"), 1.5, None, None).await;
        assert!(record.is_some());

        let drift = tracker.drift_check(&recipe, &categories).await;
        assert!(matches!(drift, DriftResult::Unchanged));
    }

    #[tokio::test]
    async fn log_records_elapsed_time_and_lora_metrics() {
        let store = Arc::new(InMemoryExperimentStore::new());
        let tracker = ProvenanceTracker::new(store, "comfygen-test");
        let mut recipe = sample_recipe();
        recipe.loras = vec![RecipeLora {
            filename: "detail.safetensors".into(),
            strength: 0.7,
            source_categories: vec!["portrait".into()],
            trigger_words: vec![],
        }];
        let category = sample_category("portrait", "face");

        let record = tracker
            .log(&recipe, &[&category], Some("file:///a.png"), 2.5, Some(4), Some("great shot"))
            .await
            .unwrap();
        let run = tracker.get_run(&record.run_id).await.unwrap();

        assert_eq!(run.metrics.get("elapsed_secs"), Some(&2.5));
        assert_eq!(run.metrics.get("rating"), Some(&4.0));
        assert_eq!(run.params.get("lora_count"), Some(&"1".to_string()));
        assert_eq!(run.params.get("category_count"), Some(&"1".to_string()));
        assert_eq!(run.params.get("checkpoint"), Some(&"default".to_string()));
        assert_eq!(run.params.get("lora_0_name"), Some(&"detail.safetensors".to_string()));
        assert_eq!(run.params.get("lora_0_strength"), Some(&"0.7".to_string()));
        assert_eq!(run.tags.get("artifact_url"), Some(&"file:///a.png".to_string()));
        assert_eq!(run.tags.get("generation_id"), Some(&recipe.id));
        assert_eq!(run.tags.get("feedback"), Some(&"great shot".to_string()));
    }

    #[tokio::test]
    async fn drift_check_reports_divergence_after_category_edit() {
        let store = Arc::new(InMemoryExperimentStore::new());
        let tracker = ProvenanceTracker::new(store, "comfygen-test");
        let recipe = sample_recipe();
        let original = sample_category("portrait", "face");
        tracker.log(&recipe, &[&original], None, 1.5, None, None).await;

        let edited = sample_category("portrait", "headshot");
        let drift = tracker.drift_check(&recipe, &[&edited]).await;
        assert!(matches!(drift, DriftResult::Diverged { .. }));
    }

    #[tokio::test]
    async fn drift_check_with_no_prior_run_reports_no_prior_run() {
        let store = Arc::new(InMemoryExperimentStore::new());
        let tracker = ProvenanceTracker::new(store, "comfygen-test");
        let recipe = sample_recipe();
        let category = sample_category("portrait", "face");
        let drift = tracker.drift_check(&recipe, &[&category]).await;
        assert!(matches!(drift, DriftResult::NoPriorRun));
    }

    #[tokio::test]
    async fn top_rated_filters_and_orders() {
        let store = Arc::new(InMemoryExperimentStore::new());
        let tracker = ProvenanceTracker::new(store, "comfygen-test");
        let recipe = sample_recipe();
        let category = sample_category("portrait", "face");

        tracker.log(&recipe, &[&category], None, 1.5, Some(2), None).await;
        let good = tracker.log(&recipe, &[&category], None, 1.5, Some(5), None).await.unwrap();

        let top = tracker.top_rated(4, 10).await;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].run_id, good.run_id);
    }

    #[test]
    fn category_type_is_used_for_construction_sanity() {
        // Guards against the yaml-based fixture silently deserializing to
        // a different category_type than intended.
        let category = sample_category("portrait", "face");
        assert_eq!(category.category_type, CategoryType::Subject);
    }
}
