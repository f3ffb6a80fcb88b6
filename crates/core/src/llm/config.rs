// crates/core/src/llm/config.rs
//! LLM provider configuration, matching the configuration surface's
//! `llm_endpoint`, `llm_model`, `llm_timeout` options (spec.md §6).

/// Configuration for the optional LLM intent parser. Absent `endpoint`
/// means the parser is not configured at all, not merely unhealthy.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o-mini".into(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}
