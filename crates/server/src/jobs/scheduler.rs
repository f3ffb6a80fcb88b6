// crates/server/src/jobs/scheduler.rs
//! Job Scheduler & Backend Bridge (spec.md 4.L): resolves a generation
//! request into a recipe, submits it to the diffusion backend, and tracks
//! progress through to a terminal state.
//!
//! Cancellation is map-removal based rather than signal based: `cancel`
//! simply removes the job from the tracking map, and the background task
//! checks for its own presence at each checkpoint, exiting silently (no
//! further state mutation) the moment it finds itself gone. A job that was
//! cancelled is therefore indistinguishable from one that never existed to
//! `get` — this mirrors a tracking map as the single source of truth rather
//! than layering a separate cancellation flag on top of it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

use comfygen_core::{
    hybrid_parser, llm::LlmIntentParser, BackendExecutor, CategoryRegistry, CompositionEngine, PolicyEnforcer,
    Recipe, WorkflowRegistry,
};

use crate::objectstore::ObjectStore;
use crate::progress::ProgressHub;
use crate::provenance::ProvenanceTracker;

use super::state::JobRecord;
use super::types::{GenerateRequest, JobId, JobState, JobView};

pub struct JobScheduler {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
    registry: Arc<CategoryRegistry>,
    workflows: Arc<WorkflowRegistry>,
    executor: Arc<BackendExecutor>,
    policy: Arc<PolicyEnforcer>,
    llm: Option<Arc<LlmIntentParser>>,
    progress_hub: Arc<ProgressHub>,
    provenance: Option<Arc<ProvenanceTracker>>,
    object_store: Arc<dyn ObjectStore>,
    timeout: Duration,
    poll_interval: Duration,
}

impl JobScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CategoryRegistry>,
        workflows: Arc<WorkflowRegistry>,
        executor: Arc<BackendExecutor>,
        policy: Arc<PolicyEnforcer>,
        llm: Option<Arc<LlmIntentParser>>,
        progress_hub: Arc<ProgressHub>,
        provenance: Option<Arc<ProvenanceTracker>>,
        object_store: Arc<dyn ObjectStore>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            registry,
            workflows,
            executor,
            policy,
            llm,
            progress_hub,
            provenance,
            object_store,
            timeout,
            poll_interval,
        })
    }

    /// Accept a generation request, create a queued job, and spawn its
    /// background execution. Returns the new job id immediately.
    pub fn submit(self: &Arc<Self>, request: GenerateRequest) -> JobId {
        let id = Uuid::new_v4().to_string();
        let record = Arc::new(JobRecord::new(id.clone(), request));
        self.jobs.write().unwrap().insert(id.clone(), Arc::clone(&record));

        let scheduler = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move {
            scheduler.run(job_id, record).await;
        });

        id
    }

    pub fn get(&self, job_id: &str) -> Option<JobView> {
        self.jobs.read().unwrap().get(job_id).map(|r| r.view())
    }

    /// Remove the job from the tracking map. The background task (if still
    /// running) discovers this at its next checkpoint and exits without
    /// writing further state.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.jobs.write().unwrap().remove(job_id).is_some()
    }

    fn alive(&self, job_id: &str) -> bool {
        self.jobs.read().unwrap().contains_key(job_id)
    }

    async fn run(self: Arc<Self>, id: JobId, record: Arc<JobRecord>) {
        if !self.alive(&id) {
            return;
        }

        if let Err(e) = self.executor.health_check().await {
            tracing::warn!(job_id = %id, error = %e, "backend unreachable");
            if self.alive(&id) {
                record.fail(format!("backend unreachable: {e}"));
                self.progress_hub.push_error(&id, "backend unreachable");
            }
            return;
        }

        if !self.alive(&id) {
            return;
        }
        record.set_state(JobState::Running);

        let recipe = match self.build_recipe(&record.request).await {
            Ok(recipe) => recipe,
            Err(message) => {
                if self.alive(&id) {
                    record.fail(message.clone());
                    self.progress_hub.push_error(&id, message);
                }
                return;
            }
        };

        if !self.alive(&id) {
            return;
        }
        record.set_categories_used(recipe.source_categories.clone());
        record.set_progress(0, recipe.steps as u64, "queued upstream");

        let Some(workflow) = self.workflows.get(&recipe.workflow) else {
            let message = format!("workflow not found: {}", recipe.workflow);
            if self.alive(&id) {
                record.fail(message.clone());
                self.progress_hub.push_error(&id, message);
            }
            return;
        };

        let mut graph = workflow.graph.clone();
        BackendExecutor::apply_recipe(&mut graph, &recipe, record.request.seed);

        if !self.alive(&id) {
            return;
        }

        let client_id = record.request.client_id.clone().unwrap_or_else(|| id.clone());
        let prompt_id = match self.executor.submit(&graph, Some(client_id.as_str())).await {
            Ok(prompt_id) => prompt_id,
            Err(e) => {
                let message = format!("submission failed: {e}");
                if self.alive(&id) {
                    record.fail(message.clone());
                    self.progress_hub.push_error(&id, message);
                }
                return;
            }
        };

        if !self.alive(&id) {
            return;
        }
        self.progress_hub.start(&id, &prompt_id);

        let start = Instant::now();
        let completion = self.executor.await_completion(&prompt_id, self.timeout, self.poll_interval);
        tokio::pin!(completion);
        let result = loop {
            tokio::select! {
                res = &mut completion => break res,
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    if !self.alive(&id) {
                        return;
                    }
                }
            }
        };

        if !self.alive(&id) {
            return;
        }

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                let message = format!("generation failed: {e}");
                record.fail(message.clone());
                self.progress_hub.push_error(&id, message);
                return;
            }
        };

        let Some(image) = completion.images.first() else {
            record.fail("backend reported completion with no output images");
            self.progress_hub.push_error(&id, "no output images");
            return;
        };

        let bytes = match self
            .executor
            .fetch_artifact(&image.filename, &image.subfolder, &image.image_type)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("failed to fetch artifact: {e}");
                if self.alive(&id) {
                    record.fail(message.clone());
                    self.progress_hub.push_error(&id, message);
                }
                return;
            }
        };

        if !self.alive(&id) {
            return;
        }

        let artifact_ref = match self.object_store.put(&image.filename, &bytes).await {
            Ok(url) => url,
            Err(e) => {
                let message = format!("failed to persist artifact: {e}");
                record.fail(message.clone());
                self.progress_hub.push_error(&id, message);
                return;
            }
        };

        if !self.alive(&id) {
            return;
        }
        let elapsed_secs = start.elapsed().as_secs_f64();
        record.complete(artifact_ref.clone(), elapsed_secs);

        if let Some(provenance) = &self.provenance {
            let categories: Vec<_> = recipe
                .source_categories
                .iter()
                .filter_map(|cat_id| self.registry.get(cat_id))
                .collect();
            provenance
                .log(&recipe, &categories, Some(&artifact_ref), elapsed_secs, None, None)
                .await;
        }
    }

    /// Resolve the request into a category set (explicit categories take
    /// precedence; free text goes through the hybrid parser), enforce
    /// policy, and compose the final recipe.
    async fn build_recipe(&self, request: &GenerateRequest) -> Result<Recipe, String> {
        let category_ids: Vec<String> = if !request.categories.is_empty() {
            request.categories.clone()
        } else {
            let parsed = hybrid_parser::parse(&request.prompt, &self.registry, self.llm.as_deref(), request.min_confidence).await;
            let mut ids = parsed.explicit_categories;
            for (id, _confidence) in parsed.inferred_categories {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids
        };

        if category_ids.is_empty() {
            return Err("no categories resolved from request".to_string());
        }

        let known: Vec<_> = category_ids.iter().filter_map(|id| self.registry.get(id)).collect();
        let policy_result = self.policy.check(&known, request.policy_tier);
        if !policy_result.allowed {
            let violated: Vec<String> = policy_result.violations.iter().map(|v| v.category_id.clone()).collect();
            return Err(format!("policy violation for categories: {}", violated.join(", ")));
        }

        let engine = CompositionEngine::new(&self.registry);
        engine.compose(&category_ids).map_err(|e| e.to_string())
    }
}
