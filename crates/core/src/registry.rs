//! Category registry: loads category YAML definitions from disk and
//! provides lookup by id, type, and keyword.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::category::{Category, CategoryType};
use crate::error::RegistryError;

const SUPPORTED_SCHEMA_MAJOR: u32 = 1;

/// Loaded category definitions, indexed for fast lookup.
///
/// Constructed once at startup via [`CategoryRegistry::load`] and shared
/// behind an `Arc` rather than accessed through a global singleton.
#[derive(Debug)]
pub struct CategoryRegistry {
    categories: HashMap<String, Category>,
    by_type: HashMap<CategoryType, Vec<String>>,
    keyword_index: HashMap<String, Vec<String>>,
}

impl CategoryRegistry {
    /// Load every `*.yaml` file under `dir` (recursively) as a category
    /// definition. Files beginning with `_` are skipped, as is a
    /// `schema_version.yaml` marker file. Individual malformed files are
    /// logged and skipped rather than aborting the whole load.
    ///
    /// A missing `dir` is not fatal (spec.md 4.A's failure modes): it
    /// yields an empty registry with a warning rather than an error, since
    /// a fresh deployment without category definitions yet should still
    /// start.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            warn!(path = %dir.display(), "category directory not found, starting with an empty registry");
            return Ok(Self {
                categories: HashMap::new(),
                by_type: HashMap::new(),
                keyword_index: HashMap::new(),
            });
        }

        let mut registry = Self {
            categories: HashMap::new(),
            by_type: HashMap::new(),
            keyword_index: HashMap::new(),
        };

        let mut loaded = 0u32;
        let mut errors = 0u32;
        let mut stack = vec![dir.to_path_buf()];
        let mut files = Vec::new();
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| RegistryError::io(&current, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RegistryError::io(&current, e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|ext| ext == "yaml") {
                    files.push(path);
                }
            }
        }

        for path in files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if name.starts_with('_') || name == "schema_version.yaml" {
                continue;
            }

            match registry.load_one(&path).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!("skipping invalid category {}: {e}", path.display());
                    errors += 1;
                }
            }
        }

        if loaded > 0 {
            info!(loaded, errors, "loaded categories");
        } else if errors > 0 {
            warn!(errors, "no categories loaded");
        }

        Ok(registry)
    }

    async fn load_one(&mut self, path: &PathBuf) -> Result<(), RegistryError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::io(path, e))?;

        let category: Category =
            serde_yaml::from_str(&contents).map_err(|e| RegistryError::MalformedDefinition {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if let Some(major) = category.schema_major_version() {
            if major != SUPPORTED_SCHEMA_MAJOR {
                return Err(RegistryError::UnsupportedSchemaVersion {
                    path: path.clone(),
                    version: category.schema_version.clone(),
                });
            }
        }

        if let Some(previous) = self.categories.get(&category.id) {
            warn!(
                "duplicate category id '{}' in {}, overwriting previous definition",
                category.id,
                path.display()
            );
            if let Some(ids) = self.by_type.get_mut(&previous.category_type) {
                ids.retain(|id| id != &category.id);
            }
        }

        self.index_keywords(&category);
        self.by_type
            .entry(category.category_type)
            .or_default()
            .push(category.id.clone());

        debug!(id = %category.id, "loaded category");
        self.categories.insert(category.id.clone(), category);
        Ok(())
    }

    fn index_keywords(&mut self, category: &Category) {
        let all = category
            .keywords
            .primary
            .iter()
            .chain(category.keywords.secondary.iter())
            .chain(category.keywords.specific.iter());
        for kw in all {
            self.keyword_index
                .entry(kw.to_lowercase())
                .or_default()
                .push(category.id.clone());
        }
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn by_type(&self, category_type: CategoryType) -> Vec<&Category> {
        self.by_type
            .get(&category_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.categories.get(id))
            .collect()
    }

    /// Categories whose primary/secondary/specific keywords contain `keyword` verbatim.
    pub fn search_by_keyword(&self, keyword: &str) -> Vec<&Category> {
        self.keyword_index
            .get(&keyword.to_lowercase())
            .into_iter()
            .flatten()
            .filter_map(|id| self.categories.get(id))
            .collect()
    }

    /// Split `query` on whitespace and rank categories by how many words match,
    /// most matches first.
    pub fn search(&self, query: &str) -> Vec<&Category> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for word in query.to_lowercase().replace('-', " ").split_whitespace() {
            if let Some(ids) = self.keyword_index.get(word) {
                for id in ids {
                    *counts.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }
        let mut ranked: Vec<(&str, u32)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .filter_map(|(id, _)| self.categories.get(id))
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
