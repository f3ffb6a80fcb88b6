// crates/server/src/provenance/store.rs
//! Experiment tracking backend interface (spec.md §6 external interfaces).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("experiment store unavailable")]
    Unavailable,
    #[error("run not found: {0}")]
    RunNotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_id: String,
    pub params: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    pub tags: HashMap<String, String>,
    pub artifacts: HashMap<String, Vec<u8>>,
}

/// Filter for `search_runs`: all set fields are ANDed together.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub tag_equals: Vec<(String, String)>,
    pub min_rating: Option<u8>,
    pub limit: usize,
}

/// An experiment-tracking backend: create experiments/runs, log
/// params/metrics/tags, attach artifacts, and search runs by tag or rating.
/// Mirrors an MLflow-style tracking server without committing to one.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn create_experiment(&self, name: &str) -> Result<String, ProvenanceError>;
    async fn create_run(&self, experiment_id: &str) -> Result<String, ProvenanceError>;
    async fn log_params(&self, run_id: &str, params: HashMap<String, String>) -> Result<(), ProvenanceError>;
    async fn log_metrics(&self, run_id: &str, metrics: HashMap<String, f64>) -> Result<(), ProvenanceError>;
    async fn log_tags(&self, run_id: &str, tags: HashMap<String, String>) -> Result<(), ProvenanceError>;
    async fn attach_artifact(&self, run_id: &str, name: &str, content: Vec<u8>) -> Result<(), ProvenanceError>;
    async fn get_artifact(&self, run_id: &str, name: &str) -> Result<Option<Vec<u8>>, ProvenanceError>;
    async fn search_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, ProvenanceError>;
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, ProvenanceError>;
}

/// Null-object store used when no experiment backend is configured.
/// Every operation reports "unavailable" so [`super::tracker::ProvenanceTracker`]
/// can treat provenance logging as a best-effort side channel, never a
/// generation-blocking dependency.
pub struct NullExperimentStore;

#[async_trait]
impl ExperimentStore for NullExperimentStore {
    async fn create_experiment(&self, _name: &str) -> Result<String, ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn create_run(&self, _experiment_id: &str) -> Result<String, ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn log_params(&self, _run_id: &str, _params: HashMap<String, String>) -> Result<(), ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn log_metrics(&self, _run_id: &str, _metrics: HashMap<String, f64>) -> Result<(), ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn log_tags(&self, _run_id: &str, _tags: HashMap<String, String>) -> Result<(), ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn attach_artifact(&self, _run_id: &str, _name: &str, _content: Vec<u8>) -> Result<(), ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn get_artifact(&self, _run_id: &str, _name: &str) -> Result<Option<Vec<u8>>, ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn search_runs(&self, _filter: &RunFilter) -> Result<Vec<RunRecord>, ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
    async fn get_run(&self, _run_id: &str) -> Result<Option<RunRecord>, ProvenanceError> {
        Err(ProvenanceError::Unavailable)
    }
}

/// In-memory experiment store. Good enough as the default backend for a
/// single-process deployment and for exercising [`super::tracker::ProvenanceTracker`]
/// in tests without standing up a real tracking server.
#[derive(Default)]
pub struct InMemoryExperimentStore {
    runs: Mutex<HashMap<String, RunRecord>>,
    next_id: Mutex<u64>,
}

impl InMemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        *guard
    }
}

#[async_trait]
impl ExperimentStore for InMemoryExperimentStore {
    async fn create_experiment(&self, name: &str) -> Result<String, ProvenanceError> {
        Ok(format!("exp-{name}"))
    }

    async fn create_run(&self, experiment_id: &str) -> Result<String, ProvenanceError> {
        let run_id = format!("run-{}", self.next());
        let record = RunRecord {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            ..Default::default()
        };
        self.runs.lock().unwrap().insert(run_id.clone(), record);
        Ok(run_id)
    }

    async fn log_params(&self, run_id: &str, params: HashMap<String, String>) -> Result<(), ProvenanceError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| ProvenanceError::RunNotFound(run_id.into()))?;
        run.params.extend(params);
        Ok(())
    }

    async fn log_metrics(&self, run_id: &str, metrics: HashMap<String, f64>) -> Result<(), ProvenanceError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| ProvenanceError::RunNotFound(run_id.into()))?;
        run.metrics.extend(metrics);
        Ok(())
    }

    async fn log_tags(&self, run_id: &str, tags: HashMap<String, String>) -> Result<(), ProvenanceError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| ProvenanceError::RunNotFound(run_id.into()))?;
        run.tags.extend(tags);
        Ok(())
    }

    async fn attach_artifact(&self, run_id: &str, name: &str, content: Vec<u8>) -> Result<(), ProvenanceError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| ProvenanceError::RunNotFound(run_id.into()))?;
        run.artifacts.insert(name.to_string(), content);
        Ok(())
    }

    async fn get_artifact(&self, run_id: &str, name: &str) -> Result<Option<Vec<u8>>, ProvenanceError> {
        let runs = self.runs.lock().unwrap();
        let run = runs.get(run_id).ok_or_else(|| ProvenanceError::RunNotFound(run_id.into()))?;
        Ok(run.artifacts.get(name).cloned())
    }

    async fn search_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, ProvenanceError> {
        let runs = self.runs.lock().unwrap();
        let mut matches: Vec<RunRecord> = runs
            .values()
            .filter(|run| {
                filter
                    .tag_equals
                    .iter()
                    .all(|(k, v)| run.tags.get(k).map(|actual| actual == v).unwrap_or(false))
            })
            .filter(|run| {
                filter
                    .min_rating
                    .map(|min| {
                        run.tags
                            .get("rating")
                            .and_then(|r| r.parse::<u8>().ok())
                            .map(|rating| rating >= min)
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        if filter.limit > 0 {
            matches.truncate(filter.limit);
        }
        Ok(matches)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, ProvenanceError> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips_run_data() {
        let store = InMemoryExperimentStore::new();
        let exp = store.create_experiment("comfygen").await.unwrap();
        let run = store.create_run(&exp).await.unwrap();

        store.log_tags(&run, HashMap::from([("rating".into(), "5".into())])).await.unwrap();
        store.log_params(&run, HashMap::from([("recipe_hash".into(), "abc123".into())])).await.unwrap();
        store.attach_artifact(&run, "recipe.json", b"{}".to_vec()).await.unwrap();

        let fetched = store.get_run(&run).await.unwrap().unwrap();
        assert_eq!(fetched.tags.get("rating").unwrap(), "5");
        assert_eq!(fetched.params.get("recipe_hash").unwrap(), "abc123");

        let artifact = store.get_artifact(&run, "recipe.json").await.unwrap();
        assert_eq!(artifact, Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn search_runs_filters_by_min_rating() {
        let store = InMemoryExperimentStore::new();
        let exp = store.create_experiment("comfygen").await.unwrap();

        let low = store.create_run(&exp).await.unwrap();
        store.log_tags(&low, HashMap::from([("rating".into(), "2".into())])).await.unwrap();

        let high = store.create_run(&exp).await.unwrap();
        store.log_tags(&high, HashMap::from([("rating".into(), "5".into())])).await.unwrap();

        let results = store
            .search_runs(&RunFilter {
                min_rating: Some(4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].run_id, high);
    }

    #[tokio::test]
    async fn null_store_reports_unavailable() {
        let store = NullExperimentStore;
        assert!(matches!(
            store.create_experiment("x").await,
            Err(ProvenanceError::Unavailable)
        ));
    }
}
