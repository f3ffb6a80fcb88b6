//! Keyword classifier: a weighted inverted-index scorer over category
//! keywords, built lazily at first use from a registry snapshot.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::registry::CategoryRegistry;

const WEIGHT_PRIMARY: f64 = 1.0;
const WEIGHT_SPECIFIC: f64 = 0.8;
const WEIGHT_SECONDARY: f64 = 0.6;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Primary,
    Specific,
    Secondary,
}

impl KeywordKind {
    fn weight(self) -> f64 {
        match self {
            KeywordKind::Primary => WEIGHT_PRIMARY,
            KeywordKind::Specific => WEIGHT_SPECIFIC,
            KeywordKind::Secondary => WEIGHT_SECONDARY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub category_id: String,
    pub confidence: f64,
}

/// Inverted index keyword -> `[(category_id, kind, weight)]`, built once
/// per classifier instance and read-only thereafter.
pub struct KeywordClassifier<'a> {
    registry: &'a CategoryRegistry,
    min_confidence: f64,
    index: OnceLock<HashMap<String, Vec<(String, KeywordKind)>>>,
}

impl<'a> KeywordClassifier<'a> {
    pub fn new(registry: &'a CategoryRegistry) -> Self {
        Self {
            registry,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            index: OnceLock::new(),
        }
    }

    pub fn with_min_confidence(registry: &'a CategoryRegistry, min_confidence: f64) -> Self {
        Self {
            registry,
            min_confidence,
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> &HashMap<String, Vec<(String, KeywordKind)>> {
        self.index.get_or_init(|| {
            let mut idx: HashMap<String, Vec<(String, KeywordKind)>> = HashMap::new();
            for category in self.registry.all() {
                for kw in &category.keywords.primary {
                    idx.entry(kw.to_lowercase())
                        .or_default()
                        .push((category.id.clone(), KeywordKind::Primary));
                }
                for kw in &category.keywords.specific {
                    idx.entry(kw.to_lowercase())
                        .or_default()
                        .push((category.id.clone(), KeywordKind::Specific));
                }
                for kw in &category.keywords.secondary {
                    idx.entry(kw.to_lowercase())
                        .or_default()
                        .push((category.id.clone(), KeywordKind::Secondary));
                }
            }
            idx
        })
    }

    /// Tokenize (lowercase, hyphens -> spaces, alphabetic word extraction),
    /// accumulate per-category scores using the highest-weight keyword kind
    /// seen for each token, normalize by the max observed score, and return
    /// matches at or above `min_confidence`, sorted by descending
    /// confidence.
    pub fn classify(&self, text: &str) -> Vec<KeywordMatch> {
        let tokens = tokenize(text);
        let index = self.index();

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for token in &tokens {
            let Some(hits) = index.get(token.as_str()) else {
                continue;
            };
            for (category_id, kind) in hits {
                let entry = scores.entry(category_id.as_str()).or_insert(0.0);
                *entry += kind.weight();
            }
        }

        let max_score = scores.values().cloned().fold(0.0_f64, f64::max);
        if max_score <= 0.0 {
            return Vec::new();
        }

        let mut matches: Vec<KeywordMatch> = scores
            .into_iter()
            .map(|(id, score)| KeywordMatch {
                category_id: id.to_string(),
                confidence: score / max_score,
            })
            .filter(|m| m.confidence >= self.min_confidence)
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category_id.cmp(&b.category_id))
        });
        matches
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('-', " ")
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphabetic()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect()
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
    async fn tied_max_scores_both_hit_confidence_one() {
        let registry = registry_with(&[
            (
                "portrait",
                "id: portrait\ntype: subject\ndisplay_name: Portrait\nkeywords:\n  primary: [\"portrait\"]\n",
            ),
            (
                "outdoor",
                "id: outdoor\ntype: setting\ndisplay_name: Outdoor\nkeywords:\n  primary: [\"garden\"]\n",
            ),
        ])
        .await;
        let classifier = KeywordClassifier::with_min_confidence(&registry, 0.3);
        let matches = classifier.classify("professional headshot in a garden portrait");
        let ids: Vec<&str> = matches.iter().map(|m| m.category_id.as_str()).collect();
        assert!(ids.contains(&"portrait"));
        assert!(ids.contains(&"outdoor"));
        let portrait = matches.iter().find(|m| m.category_id == "portrait").unwrap();
        assert_eq!(portrait.confidence, 1.0);
    }

    #[tokio::test]
    async fn below_min_confidence_excluded() {
        let registry = registry_with(&[(
            "portrait",
            "id: portrait\ntype: subject\ndisplay_name: Portrait\nkeywords:\n  primary: [\"portrait\"]\n  secondary: [\"face\"]\n",
        ), (
            "outdoor",
            "id: outdoor\ntype: setting\ndisplay_name: Outdoor\nkeywords:\n  primary: [\"garden\"]\n",
        )])
        .await;
        let classifier = KeywordClassifier::with_min_confidence(&registry, 0.9);
        // "face" alone only scores 0.6 weight for portrait vs 1.0 for garden's hit elsewhere;
        // without "garden" present, portrait's normalized score is 1.0 (only candidate).
        let matches = classifier.classify("face only, no garden");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].category_id, "portrait");
    }

    #[tokio::test]
    async fn no_matches_returns_empty() {
        let registry = registry_with(&[(
            "portrait",
            "id: portrait\ntype: subject\ndisplay_name: Portrait\nkeywords:\n  primary: [\"portrait\"]\n",
        )])
        .await;
        let classifier = KeywordClassifier::new(&registry);
        assert!(classifier.classify("completely unrelated words").is_empty());
    }

    #[test]
    fn tokenize_lowercases_and_splits_hyphens() {
        let tokens = tokenize("High-Quality Portrait!");
        assert_eq!(tokens, vec!["high", "quality", "portrait"]);
    }
}
