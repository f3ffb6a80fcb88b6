//! Composition engine: validates composition rules, merges prompts,
//! stacks and deduplicates LoRA modifiers, merges generation settings, and
//! selects a workflow, emitting structured provenance steps throughout.

use std::collections::{HashMap, HashSet};

use crate::category::Category;
use crate::error::CompositionError;
use crate::recipe::{CompositionStep, Recipe, RecipeLora, StepAction};
use crate::registry::CategoryRegistry;

const DEFAULT_WORKFLOW: &str = "flux-dev.json";

#[derive(Debug, Clone)]
struct Settings {
    steps: u32,
    cfg: f64,
    width: u32,
    height: u32,
    sampler: Option<String>,
    scheduler: Option<String>,
    denoise: Option<f64>,
}

/// Stateless composition engine over a [`CategoryRegistry`] snapshot.
pub struct CompositionEngine<'a> {
    registry: &'a CategoryRegistry,
}

impl<'a> CompositionEngine<'a> {
    pub fn new(registry: &'a CategoryRegistry) -> Self {
        Self { registry }
    }

    /// Compose a [`Recipe`] from an ordered list of category ids. Either
    /// yields a fully valid recipe or a single error — partial success is
    /// not permitted (spec.md §7).
    pub fn compose(&self, category_ids: &[String]) -> Result<Recipe, CompositionError> {
        if category_ids.is_empty() {
            return Err(CompositionError::NoCategoriesMatched);
        }

        // 1. Resolve.
        let mut categories: Vec<&Category> = Vec::with_capacity(category_ids.len());
        for id in category_ids {
            match self.registry.get(id) {
                Some(c) => categories.push(c),
                None => return Err(CompositionError::UnknownCategory { id: id.clone() }),
            }
        }

        // 2. Validate rules.
        self.validate_rules(&categories)?;

        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        // 3. add_category events.
        for category in &categories {
            steps.push(CompositionStep::new(
                StepAction::AddCategory,
                category.id.clone(),
                format!("added category '{}' (type {:?})", category.id, category.category_type),
            ));
        }

        // 4. Merge prompts.
        let (positive_prompt, negative_prompt) = self.merge_prompts(&categories, &mut steps);

        // 5. Stack LoRAs.
        let loras = self.stack_loras(&categories, &mut steps, &mut warnings);

        // 6. Merge settings.
        let settings = self.merge_settings(&categories, &mut steps);

        // 7. Select workflow.
        let workflow = self.select_workflow(&categories, &mut steps);

        // 8. Hash.
        let id = Recipe::generate_id(category_ids);

        Ok(Recipe {
            id,
            source_categories: category_ids.to_vec(),
            positive_prompt,
            negative_prompt,
            loras,
            steps: settings.steps,
            cfg: settings.cfg,
            width: settings.width,
            height: settings.height,
            sampler: settings.sampler.clone(),
            scheduler: settings.scheduler.clone(),
            denoise: settings.denoise,
            checkpoint: None,
            vae: None,
            workflow,
            composition_steps: steps,
            warnings,
        })
    }

    fn validate_rules(&self, categories: &[&Category]) -> Result<(), CompositionError> {
        let present: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();

        for category in categories {
            for conflict in &category.composition.conflicts_with {
                if present.contains(conflict.as_str()) {
                    return Err(CompositionError::CategoryConflict {
                        a: category.id.clone(),
                        b: conflict.clone(),
                    });
                }
            }
            for required in &category.composition.requires {
                if !present.contains(required.as_str()) {
                    return Err(CompositionError::MissingRequirement {
                        id: category.id.clone(),
                        required: required.clone(),
                    });
                }
            }
        }

        for category in categories {
            if let Some(max) = category.composition.max_per_type {
                let count = categories
                    .iter()
                    .filter(|c| c.category_type == category.category_type)
                    .count() as u32;
                if count > max {
                    return Err(CompositionError::TooManyOfType {
                        category_type: format!("{:?}", category.category_type),
                        count,
                        max,
                    });
                }
            }
        }

        Ok(())
    }

    fn merge_prompts(&self, categories: &[&Category], steps: &mut Vec<CompositionStep>) -> (String, String) {
        let mut positive: Vec<String> = Vec::new();
        let mut negative: Vec<String> = Vec::new();
        let mut seen_positive: HashSet<String> = HashSet::new();
        let mut seen_negative: HashSet<String> = HashSet::new();
        let mut required_count = 0usize;
        let mut optional_count = 0usize;

        // Pass 1: required fragments.
        for category in categories {
            for frag in &category.prompts.positive.required {
                if seen_positive.insert(frag.to_lowercase()) {
                    positive.push(frag.clone());
                    required_count += 1;
                }
            }
        }
        for category in categories {
            for frag in &category.prompts.negative.required {
                if seen_negative.insert(frag.to_lowercase()) {
                    negative.push(frag.clone());
                    required_count += 1;
                }
            }
        }

        // Pass 2: optional fragments, positive then negative.
        for category in categories {
            for frag in &category.prompts.positive.optional {
                if seen_positive.insert(frag.to_lowercase()) {
                    positive.push(frag.clone());
                    optional_count += 1;
                }
            }
        }
        for category in categories {
            for frag in &category.prompts.negative.optional {
                if seen_negative.insert(frag.to_lowercase()) {
                    negative.push(frag.clone());
                    optional_count += 1;
                }
            }
        }

        steps.push(CompositionStep::new(
            StepAction::MergePrompts,
            "composition",
            format!("merged {required_count} required and {optional_count} optional fragments"),
        ));

        (positive.join(", "), negative.join(", "))
    }

    fn stack_loras(
        &self,
        categories: &[&Category],
        steps: &mut Vec<CompositionStep>,
        warnings: &mut Vec<String>,
    ) -> Vec<RecipeLora> {
        let mut stack: Vec<RecipeLora> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for category in categories {
            let entries = category
                .loras
                .required
                .iter()
                .chain(category.loras.recommended.iter());
            for entry in entries {
                match index.get(&entry.filename) {
                    None => {
                        index.insert(entry.filename.clone(), stack.len());
                        stack.push(RecipeLora {
                            filename: entry.filename.clone(),
                            strength: entry.strength,
                            source_categories: vec![category.id.clone()],
                            trigger_words: entry.trigger_words.clone(),
                        });
                        steps.push(CompositionStep::new(
                            StepAction::StackLora,
                            category.id.clone(),
                            format!("added lora '{}' at strength {}", entry.filename, entry.strength),
                        ));
                    }
                    Some(&pos) => {
                        let existing = &mut stack[pos];
                        existing.source_categories.push(category.id.clone());
                        let n = existing.source_categories.len() as f64;
                        existing.strength = (existing.strength * (n - 1.0) + entry.strength) / n;
                        for word in &entry.trigger_words {
                            if !existing.trigger_words.contains(word) {
                                existing.trigger_words.push(word.clone());
                            }
                        }
                        let warning = format!(
                            "lora '{}' stacked from multiple categories ({}); strength averaged to {:.3}",
                            entry.filename,
                            existing.source_categories.join(", "),
                            existing.strength
                        );
                        warnings.push(warning.clone());
                        steps.push(CompositionStep::new(
                            StepAction::ResolveConflict,
                            category.id.clone(),
                            warning,
                        ));
                    }
                }
            }
        }

        stack
    }

    fn merge_settings(&self, categories: &[&Category], steps: &mut Vec<CompositionStep>) -> Settings {
        let mut steps_val: u32 = 30;
        let mut cfg_val: f64 = 7.5;
        let mut width: u32 = 1024;
        let mut height: u32 = 1024;
        let mut sampler: Option<String> = None;
        let mut scheduler: Option<String> = None;
        let mut denoise: Option<f64> = None;

        for category in categories {
            if let Some(range) = &category.settings.steps {
                if let Some(default) = range.default {
                    steps_val = default as u32;
                } else if let (Some(min), Some(max)) = (range.min, range.max) {
                    steps_val = ((min as i64 + max as i64) / 2) as u32;
                }
            }
            if let Some(range) = &category.settings.cfg {
                if let Some(default) = range.default {
                    cfg_val = default;
                } else if let (Some(min), Some(max)) = (range.min, range.max) {
                    cfg_val = (min + max) / 2.0;
                }
            }
            if let Some(size) = &category.settings.size {
                if let Some(w) = size.width {
                    width = w;
                }
                if let Some(h) = size.height {
                    height = h;
                }
            }
            if let Some(s) = &category.settings.sampler {
                sampler = Some(s.clone());
            }
            if let Some(s) = &category.settings.scheduler {
                scheduler = Some(s.clone());
            }
            if let Some(d) = category.settings.denoise {
                denoise = Some(d);
            }
        }

        steps.push(CompositionStep::new(
            StepAction::ApplySettings,
            "composition",
            format!("steps={steps_val} cfg={cfg_val} size={width}x{height}"),
        ));

        Settings {
            steps: steps_val,
            cfg: cfg_val,
            width,
            height,
            sampler,
            scheduler,
            denoise,
        }
    }

    fn select_workflow(&self, categories: &[&Category], steps: &mut Vec<CompositionStep>) -> String {
        for category in categories {
            if category.category_type == crate::category::CategoryType::Subject {
                if let Some(first) = category.workflows.preferred.first() {
                    steps.push(CompositionStep::new(
                        StepAction::SelectWorkflow,
                        category.id.clone(),
                        format!("selected preferred workflow '{first}' from subject category"),
                    ));
                    return first.clone();
                }
            }
        }
        for category in categories {
            if let Some(first) = category.workflows.preferred.first() {
                steps.push(CompositionStep::new(
                    StepAction::SelectWorkflow,
                    category.id.clone(),
                    format!("selected preferred workflow '{first}'"),
                ));
                return first.clone();
            }
        }
        steps.push(CompositionStep::new(
            StepAction::SelectWorkflow,
            "default",
            format!("no category declared a preferred workflow, using default '{DEFAULT_WORKFLOW}'"),
        ));
        DEFAULT_WORKFLOW.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn registry_with(categories: &[(&str, &str)]) -> CategoryRegistry {
        let dir = tempfile::tempdir().unwrap();
        for (id, yaml) in categories {
            let mut f = tokio::fs::File::create(dir.path().join(format!("{id}.yaml")))
                .await
                .unwrap();
            f.write_all(yaml.as_bytes()).await.unwrap();
        }
        CategoryRegistry::load(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn empty_category_list_errors() {
        let registry = registry_with(&[]).await;
        let engine = CompositionEngine::new(&registry);
        let err = engine.compose(&[]).unwrap_err();
        assert!(matches!(err, CompositionError::NoCategoriesMatched));
    }

    #[tokio::test]
    async fn unknown_category_errors() {
        let registry = registry_with(&[]).await;
        let engine = CompositionEngine::new(&registry);
        let err = engine.compose(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, CompositionError::UnknownCategory { .. }));
    }

    #[tokio::test]
    async fn conflicting_pair_fails_either_order() {
        let registry = registry_with(&[
            (
                "a",
                "id: a\ntype: style\ndisplay_name: A\ncomposition:\n  conflicts_with: [\"b\"]\n",
            ),
            ("b", "id: b\ntype: style\ndisplay_name: B\n"),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        assert!(engine.compose(&["a".to_string(), "b".to_string()]).is_err());
        assert!(engine.compose(&["b".to_string(), "a".to_string()]).is_err());
    }

    #[tokio::test]
    async fn missing_requirement_fails() {
        let registry = registry_with(&[(
            "a",
            "id: a\ntype: style\ndisplay_name: A\ncomposition:\n  requires: [\"b\"]\n",
        )])
        .await;
        let engine = CompositionEngine::new(&registry);
        let err = engine.compose(&["a".to_string()]).unwrap_err();
        assert!(matches!(err, CompositionError::MissingRequirement { .. }));
    }

    #[tokio::test]
    async fn max_per_type_exceeded_fails() {
        let registry = registry_with(&[
            (
                "a",
                "id: a\ntype: subject\ndisplay_name: A\ncomposition:\n  max_per_type: 1\n",
            ),
            ("b", "id: b\ntype: subject\ndisplay_name: B\n"),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        let err = engine.compose(&["a".to_string(), "b".to_string()]).unwrap_err();
        assert!(matches!(err, CompositionError::TooManyOfType { .. }));
    }

    #[tokio::test]
    async fn lora_merge_averages_strength_and_warns() {
        let registry = registry_with(&[
            (
                "a",
                "id: a\ntype: style\ndisplay_name: A\nloras:\n  required:\n    - filename: detail.safetensors\n      strength: 0.6\n",
            ),
            (
                "b",
                "id: b\ntype: style\ndisplay_name: B\nloras:\n  required:\n    - filename: detail.safetensors\n      strength: 0.8\n",
            ),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine.compose(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(recipe.loras.len(), 1);
        let lora = &recipe.loras[0];
        assert!((lora.strength - 0.7).abs() < 1e-9);
        assert_eq!(lora.source_categories, vec!["a", "b"]);
        assert_eq!(recipe.warnings.len(), 1);
    }

    #[tokio::test]
    async fn compose_is_deterministic_for_same_multiset() {
        let registry = registry_with(&[
            ("a", "id: a\ntype: style\ndisplay_name: A\n"),
            ("b", "id: b\ntype: style\ndisplay_name: B\n"),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        let r1 = engine.compose(&["a".to_string(), "b".to_string()]).unwrap();
        let r2 = engine.compose(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(r1.id, r2.id);
        assert_eq!(r1.composition_steps, r2.composition_steps);
    }

    #[tokio::test]
    async fn prompt_fragments_are_deduplicated_case_insensitively() {
        let registry = registry_with(&[
            (
                "a",
                "id: a\ntype: style\ndisplay_name: A\nprompts:\n  positive:\n    required: [\"Golden Hour\"]\n",
            ),
            (
                "b",
                "id: b\ntype: style\ndisplay_name: B\nprompts:\n  positive:\n    required: [\"golden hour\"]\n",
            ),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine.compose(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(recipe.positive_prompt, "Golden Hour");
    }

    #[tokio::test]
    async fn settings_prefer_default_over_midpoint() {
        let registry = registry_with(&[(
            "a",
            "id: a\ntype: style\ndisplay_name: A\nsettings:\n  steps:\n    min: 10\n    max: 50\n    default: 25\n",
        )])
        .await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine.compose(&["a".to_string()]).unwrap();
        assert_eq!(recipe.steps, 25);
    }

    #[tokio::test]
    async fn settings_midpoint_when_no_default() {
        let registry = registry_with(&[(
            "a",
            "id: a\ntype: style\ndisplay_name: A\nsettings:\n  steps:\n    min: 10\n    max: 50\n",
        )])
        .await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine.compose(&["a".to_string()]).unwrap();
        assert_eq!(recipe.steps, 30);
    }

    #[tokio::test]
    async fn workflow_selection_prefers_subject_category() {
        let registry = registry_with(&[
            (
                "style_x",
                "id: style_x\ntype: style\ndisplay_name: StyleX\nworkflows:\n  preferred: [\"style.json\"]\n",
            ),
            (
                "subject_x",
                "id: subject_x\ntype: subject\ndisplay_name: SubjectX\nworkflows:\n  preferred: [\"subject.json\"]\n",
            ),
        ])
        .await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine
            .compose(&["style_x".to_string(), "subject_x".to_string()])
            .unwrap();
        assert_eq!(recipe.workflow, "subject.json");
    }

    #[tokio::test]
    async fn workflow_falls_back_to_default() {
        let registry = registry_with(&[("a", "id: a\ntype: style\ndisplay_name: A\n")]).await;
        let engine = CompositionEngine::new(&registry);
        let recipe = engine.compose(&["a".to_string()]).unwrap();
        assert_eq!(recipe.workflow, DEFAULT_WORKFLOW);
    }
}
