// crates/server/src/config.rs
//! Server configuration: CLI flags with `COMFYGEN_*` environment variable
//! fallback (spec.md §2's ambient config layer). The host teacher repo
//! never reached for `clap` despite depending on it; this follows the
//! pattern from a sibling CLI-backed server in the same corpus instead.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "comfygen-server", version, about = "Image-generation orchestration service")]
pub struct Config {
    /// Address the API server binds to.
    #[arg(long, env = "COMFYGEN_API_HOST", default_value = "0.0.0.0")]
    pub api_host: String,

    /// Port the API server binds to.
    #[arg(long, env = "COMFYGEN_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Diffusion backend host (spec.md §6 external interfaces).
    #[arg(long, env = "COMFYGEN_BACKEND_HOST", default_value = "127.0.0.1")]
    pub backend_host: String,

    /// Diffusion backend port.
    #[arg(long, env = "COMFYGEN_BACKEND_PORT", default_value_t = 8188)]
    pub backend_port: u16,

    /// Directory of `*.yaml` category definitions (spec.md 4.A).
    #[arg(long, env = "COMFYGEN_CATEGORIES_DIR", default_value = "./categories")]
    pub categories_dir: PathBuf,

    /// Directory of workflow node-graph JSON documents (spec.md 4.C).
    #[arg(long, env = "COMFYGEN_WORKFLOWS_DIR", default_value = "./workflows")]
    pub workflows_dir: PathBuf,

    /// Directory generated artifacts are written to by the default
    /// filesystem-backed object store.
    #[arg(long, env = "COMFYGEN_OBJECT_STORE_DIR", default_value = "./artifacts")]
    pub object_store_dir: PathBuf,

    /// Optional LLM provider endpoint (spec.md 4.E). Omitted means the
    /// hybrid parser falls back to keyword-only matching.
    #[arg(long, env = "COMFYGEN_LLM_ENDPOINT")]
    pub llm_endpoint: Option<String>,

    #[arg(long, env = "COMFYGEN_LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "COMFYGEN_LLM_API_KEY")]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "COMFYGEN_LLM_TIMEOUT_SECS", default_value_t = 10)]
    pub llm_timeout_secs: u64,

    /// Experiment name runs are grouped under (spec.md 4.M).
    #[arg(long, env = "COMFYGEN_EXPERIMENT_NAME", default_value = "comfygen")]
    pub experiment_name: String,

    /// Enable the in-memory experiment store. Without this flag,
    /// provenance logging is a no-op (spec.md 4.M's non-goal: a production
    /// tracking server integration is out of scope).
    #[arg(long, env = "COMFYGEN_ENABLE_PROVENANCE")]
    pub enable_provenance: bool,

    /// Overall timeout for a single generation, from submission to
    /// completion (spec.md 4.J).
    #[arg(long, env = "COMFYGEN_GENERATION_TIMEOUT_SECS", default_value_t = 300)]
    pub generation_timeout_secs: u64,

    /// Interval between `GET /history/:id` polls while awaiting completion.
    #[arg(long, env = "COMFYGEN_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Minimum keyword-classifier confidence, used as the default when a
    /// request omits `min_confidence` (spec.md 4.D).
    #[arg(long, env = "COMFYGEN_MIN_CONFIDENCE", default_value_t = comfygen_core::keyword_classifier::DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: f64,
}

impl Config {
    pub fn backend_http_base(&self) -> String {
        format!("http://{}:{}", self.backend_host, self.backend_port)
    }

    pub fn backend_ws_base(&self) -> String {
        format!("ws://{}:{}", self.backend_host, self.backend_port)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_http_and_ws_bases_from_host_and_port() {
        let config = Config::parse_from(["comfygen-server", "--backend-host", "example.internal", "--backend-port", "9000"]);
        assert_eq!(config.backend_http_base(), "http://example.internal:9000");
        assert_eq!(config.backend_ws_base(), "ws://example.internal:9000");
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::parse_from(["comfygen-server"]);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.backend_port, 8188);
        assert!(!config.enable_provenance);
    }
}
