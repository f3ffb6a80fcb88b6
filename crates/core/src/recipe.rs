//! Recipe model: the deterministic, replayable specification produced by
//! the composition engine for a single generation.

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};

/// A LoRA entry stacked into a recipe, deduplicated by filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLora {
    pub filename: String,
    pub strength: f64,
    pub source_categories: Vec<String>,
    pub trigger_words: Vec<String>,
}

/// A single provenance event recorded while building a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionStep {
    pub action: StepAction,
    pub source: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    AddCategory,
    MergePrompts,
    StackLora,
    ResolveConflict,
    ApplySettings,
    SelectWorkflow,
}

impl CompositionStep {
    pub fn new(action: StepAction, source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action,
            source: source.into(),
            detail: detail.into(),
        }
    }
}

/// The recipe produced by the composition engine: immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub source_categories: Vec<String>,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub loras: Vec<RecipeLora>,
    pub steps: u32,
    pub cfg: f64,
    pub width: u32,
    pub height: u32,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub checkpoint: Option<String>,
    pub vae: Option<String>,
    pub workflow: String,
    pub composition_steps: Vec<CompositionStep>,
    pub warnings: Vec<String>,
}

impl Recipe {
    /// First 16 hex chars of SHA-256 over the sorted source-category ids,
    /// joined by `:`. A pure function of the multiset of ids.
    pub fn generate_id(category_ids: &[String]) -> String {
        let mut sorted: Vec<&str> = category_ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let joined = sorted.join(":");
        let digest = Sha256::digest(joined.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Deterministic content hash over the values that determine what gets
    /// submitted to the backend: prompts, LoRA filename/strength pairs
    /// (sorted by filename), numeric settings, and workflow name.
    ///
    /// This is distinct from `id`, which only covers source category ids;
    /// `recipe_hash` covers the fully-merged output and is used by the
    /// provenance tracker for drift detection.
    pub fn recipe_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.positive_prompt.as_bytes());
        hasher.update(b"|");
        hasher.update(self.negative_prompt.as_bytes());
        hasher.update(b"|");

        let mut loras: Vec<&RecipeLora> = self.loras.iter().collect();
        loras.sort_by(|a, b| a.filename.cmp(&b.filename));
        for lora in loras {
            hasher.update(lora.filename.as_bytes());
            hasher.update(b":");
            hasher.update(format!("{:.4}", lora.strength).as_bytes());
            hasher.update(b";");
        }
        hasher.update(b"|");
        hasher.update(self.steps.to_le_bytes());
        hasher.update(format!("{:.4}", self.cfg).as_bytes());
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        if let Some(d) = self.denoise {
            hasher.update(format!("{:.4}", d).as_bytes());
        }
        if let Some(s) = &self.sampler {
            hasher.update(s.as_bytes());
        }
        if let Some(s) = &self.scheduler {
            hasher.update(s.as_bytes());
        }
        if let Some(c) = &self.checkpoint {
            hasher.update(c.as_bytes());
        }
        if let Some(v) = &self.vae {
            hasher.update(v.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(self.workflow.as_bytes());

        hex::encode(hasher.finalize())[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_is_order_independent() {
        let a = Recipe::generate_id(&["portrait".into(), "outdoor".into()]);
        let b = Recipe::generate_id(&["outdoor".into(), "portrait".into()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn generate_id_differs_for_different_sets() {
        let a = Recipe::generate_id(&["portrait".into()]);
        let b = Recipe::generate_id(&["portrait".into(), "outdoor".into()]);
        assert_ne!(a, b);
    }

    fn sample_recipe() -> Recipe {
        Recipe {
            id: "abc".into(),
            source_categories: vec!["portrait".into()],
            positive_prompt: "a woman, portrait".into(),
            negative_prompt: "blurry".into(),
            loras: vec![RecipeLora {
                filename: "detail.safetensors".into(),
                strength: 0.7,
                source_categories: vec!["portrait".into()],
                trigger_words: vec![],
            }],
            steps: 30,
            cfg: 7.5,
            width: 1024,
            height: 1024,
            sampler: None,
            scheduler: None,
            denoise: None,
            checkpoint: None,
            vae: None,
            workflow: "flux-dev.json".into(),
            composition_steps: vec![],
            warnings: vec![],
        }
    }

    #[test]
    fn recipe_hash_is_deterministic() {
        let r = sample_recipe();
        assert_eq!(r.recipe_hash(), r.recipe_hash());
        assert_eq!(r.recipe_hash().len(), 16);
    }

    #[test]
    fn recipe_hash_changes_with_prompt() {
        let mut r = sample_recipe();
        let h1 = r.recipe_hash();
        r.positive_prompt.push_str(", extra");
        assert_ne!(h1, r.recipe_hash());
    }

    #[test]
    fn serde_round_trip_preserves_equality() {
        let r = sample_recipe();
        let json = serde_json::to_string(&r).unwrap();
        let back: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
