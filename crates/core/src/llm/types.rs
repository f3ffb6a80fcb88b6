// crates/core/src/llm/types.rs
//! Request/response types for the LLM intent parser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Structured reply the LLM intent parser resolves from the raw model
/// response: categories the model believes apply, plus a handful of
/// free-text hints the hybrid parser folds into the composed recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedIntent {
    pub categories: Vec<String>,
    pub subject: Option<String>,
    pub style: Option<String>,
    pub modifiers: HashMap<String, String>,
    pub content_tier: Option<String>,
}

impl ParsedIntent {
    /// Drop any category id not present in `available`, per spec.md 4.E
    /// ("Categories not present in the available list are discarded").
    pub fn retain_available(&mut self, available: &[String]) {
        self.categories.retain(|id| available.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_available_drops_unknown_categories() {
        let mut intent = ParsedIntent {
            categories: vec!["portrait".into(), "made-up".into()],
            ..Default::default()
        };
        intent.retain_available(&["portrait".to_string(), "outdoor".to_string()]);
        assert_eq!(intent.categories, vec!["portrait".to_string()]);
    }
}
