// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use comfygen_core::llm::{HttpLlmProvider, LlmConfig, LlmIntentParser, LlmProvider};
use comfygen_core::{BackendExecutor, CategoryRegistry, PolicyEnforcer, WorkflowRegistry};

use crate::config::Config;
use crate::jobs::JobScheduler;
use crate::objectstore::{LocalObjectStore, ObjectStore};
use crate::progress::ProgressHub;
use crate::provenance::{InMemoryExperimentStore, NullExperimentStore, ProvenanceTracker};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<CategoryRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub executor: Arc<BackendExecutor>,
    pub policy: Arc<PolicyEnforcer>,
    pub llm: Option<Arc<LlmIntentParser>>,
    pub progress_hub: Arc<ProgressHub>,
    pub provenance: Option<Arc<ProvenanceTracker>>,
    pub scheduler: Arc<JobScheduler>,
    started_at: Instant,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl AppState {
    /// Load the category and workflow registries and wire every subsystem
    /// from `config`. A missing category/workflow directory is tolerated
    /// (see [`CategoryRegistry::load`]/[`WorkflowRegistry::load`]); only a
    /// malformed directory read fails startup.
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(CategoryRegistry::load(&config.categories_dir).await?);
        let workflows = Arc::new(WorkflowRegistry::load(&config.workflows_dir).await?);
        let executor = Arc::new(BackendExecutor::new(config.backend_http_base()));
        let policy = Arc::new(PolicyEnforcer::new());

        let llm = match &config.llm_endpoint {
            Some(endpoint) => {
                let llm_config = LlmConfig {
                    endpoint: Some(endpoint.clone()),
                    model: config.llm_model.clone(),
                    api_key: config.llm_api_key.clone(),
                    timeout_secs: config.llm_timeout_secs,
                };
                match HttpLlmProvider::new(&llm_config) {
                    Ok(provider) => Some(Arc::new(LlmIntentParser::new(Arc::new(provider) as Arc<dyn LlmProvider>))),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to construct LLM provider, continuing keyword-only");
                        None
                    }
                }
            }
            None => None,
        };

        let progress_hub = Arc::new(ProgressHub::new(config.backend_ws_base()));

        let provenance = if config.enable_provenance {
            Some(Arc::new(ProvenanceTracker::new(
                Arc::new(InMemoryExperimentStore::new()),
                config.experiment_name.clone(),
            )))
        } else {
            Some(Arc::new(ProvenanceTracker::new(
                Arc::new(NullExperimentStore),
                config.experiment_name.clone(),
            )))
        };

        let object_store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.object_store_dir));

        let scheduler = JobScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&workflows),
            Arc::clone(&executor),
            Arc::clone(&policy),
            llm.clone(),
            Arc::clone(&progress_hub),
            provenance.clone(),
            object_store,
            std::time::Duration::from_secs(config.generation_timeout_secs),
            std::time::Duration::from_millis(config.poll_interval_ms),
        );

        Ok(Arc::new(Self {
            config,
            registry,
            workflows,
            executor,
            policy,
            llm,
            progress_hub,
            provenance,
            scheduler,
            started_at: Instant::now(),
        }))
    }
}
