//! Hybrid parser: merges explicit tags, an optional LLM pass, and keyword
//! classification into one ranked resolution, with precedence
//! explicit > LLM > keyword (spec.md 4.F).

use std::collections::HashMap;

use crate::keyword_classifier::KeywordClassifier;
use crate::llm::LlmIntentParser;
use crate::registry::CategoryRegistry;
use crate::tag_parser::{parse_tags, UnmatchedTag};

#[derive(Debug, Clone, PartialEq)]
pub struct HybridParseResult {
    pub explicit_categories: Vec<String>,
    pub explicit_strengths: HashMap<String, f64>,
    pub inferred_categories: Vec<(String, f64)>,
    pub unmatched_tags: Vec<UnmatchedTag>,
    pub remaining_prompt: String,
    /// "hybrid" when the LLM contributed, "keyword" on fallback — spec.md
    /// §7's LLMUnavailable handling ("source tagged keyword instead of
    /// hybrid").
    pub source: &'static str,
}

/// Resolve `text` against `registry`, optionally consulting `llm` if
/// configured and healthy. `min_confidence` gates the keyword pass.
pub async fn parse(
    text: &str,
    registry: &CategoryRegistry,
    llm: Option<&LlmIntentParser>,
    min_confidence: f64,
) -> HybridParseResult {
    let tag_result = parse_tags(text, registry);
    let explicit_ids: Vec<String> = tag_result
        .matched
        .iter()
        .map(|m| m.category_id.clone())
        .collect();
    let explicit_strengths: HashMap<String, f64> = tag_result
        .matched
        .iter()
        .map(|m| (m.category_id.clone(), m.strength))
        .collect();

    let classifier = KeywordClassifier::with_min_confidence(registry, min_confidence);
    let keyword_matches = classifier
        .classify(&tag_result.remaining_text)
        .into_iter()
        .filter(|m| !explicit_ids.contains(&m.category_id))
        .collect::<Vec<_>>();

    let mut order: Vec<String> = Vec::new();
    let mut confidence: HashMap<String, f64> = HashMap::new();
    let mut source = "keyword";

    for id in &explicit_ids {
        if !order.contains(id) {
            order.push(id.clone());
        }
        confidence.insert(id.clone(), 1.0);
    }

    if let Some(llm) = llm {
        let available: Vec<String> = registry.all().map(|c| c.id.clone()).collect();
        if let Some(intent) = llm.parse(text, &available).await {
            source = "hybrid";
            for id in &intent.categories {
                if !order.contains(id) {
                    order.push(id.clone());
                }
                // Precedence: a later channel never overrides a strength
                // or confidence established by an earlier one.
                confidence.entry(id.clone()).or_insert(1.0);
            }
        }
    }

    for m in &keyword_matches {
        if !order.contains(&m.category_id) {
            order.push(m.category_id.clone());
        }
        confidence.entry(m.category_id.clone()).or_insert(m.confidence);
    }

    let inferred_categories: Vec<(String, f64)> = order
        .iter()
        .filter(|id| !explicit_ids.contains(id))
        .map(|id| (id.clone(), *confidence.get(id).unwrap_or(&0.0)))
        .collect();

    HybridParseResult {
        explicit_categories: explicit_ids,
        explicit_strengths,
        inferred_categories,
        unmatched_tags: tag_result.unmatched,
        remaining_prompt: tag_result.remaining_text,
        source,
    }
}
