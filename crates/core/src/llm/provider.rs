// crates/core/src/llm/provider.rs
//! LlmProvider trait: the seam the hybrid parser talks to, generalized
//! from a single HTTP backend so a test double can implement it without a
//! network call.

use async_trait::async_trait;

use crate::error::LlmError;

use super::types::ParsedIntent;

/// A provider capable of resolving free text into a [`ParsedIntent`].
///
/// The request contract (spec.md 4.E): a system instruction enumerates
/// available category ids, the user message is the raw prompt, and the
/// reply must be a structured document with `categories[]`, `subject?`,
/// `style?`, `modifiers{}`, `content_tier`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Resolve `text` into a [`ParsedIntent`], restricted to the category
    /// ids in `available_categories`.
    async fn parse(
        &self,
        text: &str,
        available_categories: &[String],
    ) -> Result<ParsedIntent, LlmError>;

    /// Check whether the provider is reachable and configured correctly.
    async fn health_check(&self) -> Result<(), LlmError>;

    /// Provider name for logging/display.
    fn name(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;
}
