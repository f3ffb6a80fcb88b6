// crates/core/src/llm/parser.rs
//! LLM intent parser: wraps an [`LlmProvider`], caching by a hash of the
//! normalized prompt and probing health exactly once per lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use super::provider::LlmProvider;
use super::types::ParsedIntent;

const DEFAULT_CACHE_CAP: usize = 256;

/// Wraps a concrete [`LlmProvider`] with the availability/caching contract
/// spec.md 4.E requires: `parse(text) -> ParsedIntent?` where an absent
/// value means "unavailable, fall back", a single health probe per
/// lifetime (cached, reset only explicitly), and a read-through cache
/// keyed by a hash of the normalized prompt.
pub struct LlmIntentParser {
    provider: Arc<dyn LlmProvider>,
    healthy: OnceCell<bool>,
    probed: AtomicBool,
    cache: Mutex<HashMap<String, ParsedIntent>>,
    cache_cap: usize,
}

impl LlmIntentParser {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            healthy: OnceCell::new(),
            probed: AtomicBool::new(false),
            cache: Mutex::new(HashMap::new()),
            cache_cap: DEFAULT_CACHE_CAP,
        }
    }

    /// Resolve `text` into a [`ParsedIntent`], or `None` if the provider is
    /// unhealthy or the call failed for any reason (timeout, network
    /// error, malformed reply) — spec.md 4.E's "absent means unavailable,
    /// fall back".
    pub async fn parse(&self, text: &str, available_categories: &[String]) -> Option<ParsedIntent> {
        if !self.is_healthy().await {
            return None;
        }

        let key = normalize_cache_key(text);
        if let Some(cached) = self.cache.lock().await.get(&key).cloned() {
            return Some(cached);
        }

        match self.provider.parse(text, available_categories).await {
            Ok(intent) => {
                let mut cache = self.cache.lock().await;
                if cache.len() >= self.cache_cap {
                    // Simple first-fit eviction; spec.md leaves the policy
                    // unspecified beyond "bounded key set".
                    if let Some(k) = cache.keys().next().cloned() {
                        cache.remove(&k);
                    }
                }
                cache.insert(key, intent.clone());
                Some(intent)
            }
            Err(e) => {
                warn!(error = %e, "LLM parse failed, falling back to keyword classification");
                None
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        if self.probed.load(Ordering::Acquire) {
            return *self.healthy.get().unwrap_or(&false);
        }
        let result = self.provider.health_check().await;
        let healthy = result.is_ok();
        if let Err(e) = &result {
            debug!(error = %e, "LLM health probe failed");
        }
        let _ = self.healthy.set(healthy);
        self.probed.store(true, Ordering::Release);
        healthy
    }

    /// Explicitly invalidate the cached health probe, forcing the next
    /// `parse` call to probe again. Used by tests and by operators
    /// reconfiguring the backend without a full restart.
    pub fn reset_health(&mut self) {
        self.healthy = OnceCell::new();
        self.probed.store(false, Ordering::Release);
    }
}

fn normalize_cache_key(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FakeProvider {
        healthy: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        async fn parse(
            &self,
            _text: &str,
            _available: &[String],
        ) -> Result<ParsedIntent, LlmError> {
            self.calls.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(ParsedIntent {
                categories: vec!["portrait".into()],
                ..Default::default()
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            if self.healthy {
                Ok(())
            } else {
                Err(LlmError::NotAvailable {
                    provider: "fake".into(),
                    reason: "down".into(),
                })
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
        fn model(&self) -> &str {
            "fake-model"
        }
    }

    #[tokio::test]
    async fn unhealthy_provider_returns_none() {
        let provider = Arc::new(FakeProvider {
            healthy: false,
            calls: AtomicUsize::new(0),
        });
        let parser = LlmIntentParser::new(provider);
        let result = parser.parse("a photo", &["portrait".to_string()]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn healthy_provider_caches_by_normalized_text() {
        let provider = Arc::new(FakeProvider {
            healthy: true,
            calls: AtomicUsize::new(0),
        });
        let parser = LlmIntentParser::new(provider.clone());
        let categories = vec!["portrait".to_string()];

        let first = parser.parse("A Photo", &categories).await;
        let second = parser.parse("a photo", &categories).await;
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(AtomicOrdering::Relaxed), 1);
    }

    #[tokio::test]
    async fn reset_health_forces_reprobe() {
        let provider = Arc::new(FakeProvider {
            healthy: false,
            calls: AtomicUsize::new(0),
        });
        let mut parser = LlmIntentParser::new(provider);
        assert!(parser.parse("x", &[]).await.is_none());
        parser.reset_health();
        assert!(parser.parse("x", &[]).await.is_none());
    }
}
