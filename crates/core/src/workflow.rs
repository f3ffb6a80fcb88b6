//! Workflow registry: loads ComfyUI-style node-graph templates and either
//! their sidecar manifests or a best-effort synthesized manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::recipe::Recipe;

/// Resolution bounds a workflow can accept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionBounds {
    pub min_width: Option<u32>,
    pub max_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_height: Option<u32>,
    pub allowed_aspect_ratios: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraCapabilities {
    pub max_loras: Option<u32>,
    pub supports_clip_lora: bool,
    pub min_strength: f64,
    pub max_strength: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointCapabilities {
    pub required_type: Option<String>,
    pub compatible_checkpoints: Vec<String>,
    pub requires_vae: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub img2img: bool,
    pub inpainting: bool,
    pub controlnet: bool,
    pub video: bool,
    pub upscale: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDefaults {
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
}

/// A workflow's declared capabilities and constraints, loaded from a
/// sidecar manifest document when present, else synthesized by scanning
/// the workflow's node graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowManifest {
    pub capabilities: Capabilities,
    pub resolution: ResolutionBounds,
    pub loras: LoraCapabilities,
    pub checkpoints: CheckpointCapabilities,
    pub node_mappings: HashMap<String, String>,
    pub defaults: WorkflowDefaults,
}

/// A loaded workflow: its raw node-graph document plus resolved manifest.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub graph: Value,
    pub manifest: WorkflowManifest,
}

/// Loaded workflow templates, indexed by name.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Workflow>,
}

const CONTROLNET_MARKERS: &[&str] = &["controlnet", "control_net"];
const VIDEO_MARKERS: &[&str] = &["animate", "video", "imagesequence", "image_sequence"];
const INPAINT_MARKERS: &[&str] = &["inpaint"];
const UPSCALE_MARKERS: &[&str] = &["upscale"];
const LORA_LOADER_MARKERS: &[&str] = &["loraloader", "lora_loader"];

impl WorkflowRegistry {
    /// Load every `*.json` workflow template under `dir`. A sidecar
    /// `<stem>.manifest.yaml` is authoritative when present; otherwise a
    /// manifest is synthesized by scanning the serialized graph.
    ///
    /// A missing `dir` mirrors [`crate::registry::CategoryRegistry::load`]:
    /// an empty registry with a warning rather than a fatal error, so a
    /// server started before any workflow templates are deployed still
    /// comes up (it simply has no workflow to select until one is added).
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            warn!(path = %dir.display(), "workflow directory not found, starting with an empty registry");
            return Ok(Self::default());
        }

        let mut registry = Self::default();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| RegistryError::io(dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::io(dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }

        let mut loaded = 0u32;
        let mut errors = 0u32;
        for path in files {
            match registry.load_one(&path).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!("skipping invalid workflow {}: {e}", path.display());
                    errors += 1;
                }
            }
        }

        if loaded > 0 {
            info!(loaded, errors, "loaded workflows");
        } else if errors > 0 {
            warn!(errors, "no workflows loaded");
        }

        Ok(registry)
    }

    async fn load_one(&mut self, path: &PathBuf) -> Result<(), RegistryError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let name = format!("{stem}.json");

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::io(path, e))?;
        let graph: Value =
            serde_json::from_str(&contents).map_err(|e| RegistryError::MalformedDefinition {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let manifest_path = path.with_file_name(format!("{stem}.manifest.yaml"));
        let manifest = if tokio::fs::try_exists(&manifest_path)
            .await
            .unwrap_or(false)
        {
            let manifest_contents = tokio::fs::read_to_string(&manifest_path)
                .await
                .map_err(|e| RegistryError::io(&manifest_path, e))?;
            serde_yaml::from_str(&manifest_contents).map_err(|e| {
                RegistryError::MalformedDefinition {
                    path: manifest_path.clone(),
                    message: e.to_string(),
                }
            })?
        } else {
            debug!(name = %name, "no sidecar manifest, synthesizing");
            synthesize_manifest(&stem, &contents)
        };

        self.workflows.insert(
            name.clone(),
            Workflow {
                name,
                graph,
                manifest,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    pub fn filter(&self, predicate: impl Fn(&Capabilities) -> bool) -> Vec<&Workflow> {
        self.workflows
            .values()
            .filter(|w| predicate(&w.manifest.capabilities))
            .collect()
    }

    /// Validate a composed recipe against a workflow's manifest, checking
    /// LoRA count, resolution bounds, and per-LoRA strength.
    pub fn validate_recipe(recipe: &Recipe, manifest: &WorkflowManifest) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(max) = manifest.loras.max_loras {
            if recipe.loras.len() as u32 > max {
                errors.push(format!(
                    "recipe requests {} loras, workflow allows at most {max}",
                    recipe.loras.len()
                ));
            }
        }

        if let Some(min_w) = manifest.resolution.min_width {
            if recipe.width < min_w {
                errors.push(format!("width {} below minimum {min_w}", recipe.width));
            }
        }
        if let Some(max_w) = manifest.resolution.max_width {
            if recipe.width > max_w {
                errors.push(format!("width {} above maximum {max_w}", recipe.width));
            }
        }
        if let Some(min_h) = manifest.resolution.min_height {
            if recipe.height < min_h {
                errors.push(format!("height {} below minimum {min_h}", recipe.height));
            }
        }
        if let Some(max_h) = manifest.resolution.max_height {
            if recipe.height > max_h {
                errors.push(format!("height {} above maximum {max_h}", recipe.height));
            }
        }

        for lora in &recipe.loras {
            if lora.strength < manifest.loras.min_strength || lora.strength > manifest.loras.max_strength {
                errors.push(format!(
                    "lora {} strength {} outside [{}, {}]",
                    lora.filename, lora.strength, manifest.loras.min_strength, manifest.loras.max_strength
                ));
            }
        }

        errors
    }
}

/// Best-effort manifest synthesis, ported from the original
/// `workflows/registry.py::_generate_manifest`: scan the serialized node
/// JSON for substrings, count LoRA-loader nodes, and infer
/// `checkpoint.required_type` from the filename.
fn synthesize_manifest(stem: &str, raw_graph: &str) -> WorkflowManifest {
    let lower = raw_graph.to_lowercase();
    let stem_lower = stem.to_lowercase();

    let capabilities = Capabilities {
        img2img: lower.contains("img2img") || lower.contains("imagetoimage"),
        inpainting: INPAINT_MARKERS.iter().any(|m| lower.contains(m)),
        controlnet: CONTROLNET_MARKERS.iter().any(|m| lower.contains(m)),
        video: VIDEO_MARKERS.iter().any(|m| lower.contains(m)),
        upscale: UPSCALE_MARKERS.iter().any(|m| lower.contains(m)),
    };

    let lora_count = LORA_LOADER_MARKERS
        .iter()
        .map(|m| lower.matches(m).count())
        .sum::<usize>() as u32;

    let required_type = if stem_lower.contains("flux") {
        Some("flux".to_string())
    } else if stem_lower.contains("xl") || stem_lower.contains("sdxl") {
        Some("sdxl".to_string())
    } else if stem_lower.contains("sd15") || stem_lower.contains("sd1.5") {
        Some("sd15".to_string())
    } else if stem_lower.contains("wan") {
        Some("wan".to_string())
    } else {
        None
    };

    WorkflowManifest {
        capabilities,
        resolution: ResolutionBounds::default(),
        loras: LoraCapabilities {
            max_loras: if lora_count > 0 { Some(lora_count) } else { None },
            supports_clip_lora: false,
            min_strength: 0.0,
            max_strength: 2.0,
        },
        checkpoints: CheckpointCapabilities {
            required_type,
            compatible_checkpoints: Vec::new(),
            requires_vae: false,
        },
        node_mappings: HashMap::new(),
        defaults: WorkflowDefaults::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = tokio::fs::File::create(dir.join(name)).await.unwrap();
        f.write_all(contents.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn loads_workflow_with_sidecar_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "flux-dev.json", r#"{"1": {"class_type": "KSampler"}}"#).await;
        write_file(
            dir.path(),
            "flux-dev.manifest.yaml",
            "checkpoints:\n  required_type: flux\nloras:\n  max_loras: 3\n",
        )
        .await;

        let registry = WorkflowRegistry::load(dir.path()).await.unwrap();
        let wf = registry.get("flux-dev.json").unwrap();
        assert_eq!(wf.manifest.checkpoints.required_type.as_deref(), Some("flux"));
        assert_eq!(wf.manifest.loras.max_loras, Some(3));
    }

    #[tokio::test]
    async fn synthesizes_manifest_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "sdxl-controlnet.json",
            r#"{"1": {"class_type": "ControlNetApply"}, "2": {"class_type": "LoraLoader"}}"#,
        )
        .await;

        let registry = WorkflowRegistry::load(dir.path()).await.unwrap();
        let wf = registry.get("sdxl-controlnet.json").unwrap();
        assert!(wf.manifest.capabilities.controlnet);
        assert_eq!(wf.manifest.checkpoints.required_type.as_deref(), Some("sdxl"));
        assert_eq!(wf.manifest.loras.max_loras, Some(1));
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_registry() {
        let registry = WorkflowRegistry::load("/nonexistent/workflows/dir")
            .await
            .unwrap();
        assert!(registry.all().next().is_none());
    }

    #[test]
    fn validate_recipe_flags_oversized_lora_stack() {
        let manifest = WorkflowManifest {
            loras: LoraCapabilities {
                max_loras: Some(1),
                min_strength: 0.0,
                max_strength: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let recipe = Recipe {
            id: "x".into(),
            source_categories: vec![],
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            loras: vec![
                crate::recipe::RecipeLora {
                    filename: "a.safetensors".into(),
                    strength: 0.5,
                    source_categories: vec![],
                    trigger_words: vec![],
                },
                crate::recipe::RecipeLora {
                    filename: "b.safetensors".into(),
                    strength: 0.5,
                    source_categories: vec![],
                    trigger_words: vec![],
                },
            ],
            steps: 30,
            cfg: 7.5,
            width: 1024,
            height: 1024,
            sampler: None,
            scheduler: None,
            denoise: None,
            checkpoint: None,
            vae: None,
            workflow: "x.json".into(),
            composition_steps: vec![],
            warnings: vec![],
        };
        let errors = WorkflowRegistry::validate_recipe(&recipe, &manifest);
        assert_eq!(errors.len(), 1);
    }
}
