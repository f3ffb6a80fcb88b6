//! Category definitions: domain expertise with best practices for image generation.

use serde::{Deserialize, Serialize};

/// Type of category for composition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Subject,
    Setting,
    Modifier,
    Style,
}

/// Content policy tier, forming a total order general < mature < explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    General,
    Mature,
    Explicit,
}

/// Keywords for category matching, in three disjoint weight tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub primary: Vec<String>,
    pub specific: Vec<String>,
    pub secondary: Vec<String>,
}

/// Prompt fragments split into required (always applied) and optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentSet {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub positive: FragmentSet,
    pub negative: FragmentSet,
}

/// A LoRA recommendation attached to a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraDefaults {
    pub filename: String,
    #[serde(default = "default_lora_strength")]
    pub strength: f64,
    #[serde(default)]
    pub trigger_words: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_lora_strength() -> f64 {
    0.6
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Loras {
    pub required: Vec<LoraDefaults>,
    pub recommended: Vec<LoraDefaults>,
}

/// A `{min, max, default}` numeric range used for recommended generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeSetting {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySettings {
    pub steps: Option<SettingRange>,
    pub cfg: Option<SettingRange>,
    pub size: Option<SizeSetting>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWorkflows {
    pub preferred: Vec<String>,
}

/// Rules governing how this category composes with others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionRules {
    pub stacks_with: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub requires: Vec<String>,
    pub max_per_type: Option<u32>,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    50
}

/// A category: a named bundle of prompts, modifiers, settings, and
/// composition rules describing a domain (e.g. "portrait").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    #[serde(rename = "type")]
    pub category_type: CategoryType,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_policy_tier")]
    pub policy_tier: PolicyTier,
    #[serde(default)]
    pub keywords: Keywords,
    #[serde(default)]
    pub prompts: Prompts,
    #[serde(default)]
    pub loras: Loras,
    #[serde(default)]
    pub settings: CategorySettings,
    #[serde(default)]
    pub workflows: CategoryWorkflows,
    #[serde(default)]
    pub composition: CompositionRules,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_policy_tier() -> PolicyTier {
    PolicyTier::General
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl Category {
    /// Major component of `schema_version` (e.g. "2.1" -> 2).
    ///
    /// An unknown minor version is compatible; only an unrecognized major
    /// version is treated as a load error by the registry.
    pub fn schema_major_version(&self) -> Option<u32> {
        self.schema_version.split('.').next()?.parse().ok()
    }
}
