// crates/server/src/jobs/state.rs
//! Mutable record for a single generation job (spec.md 4.L, Job in §3).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use tokio::sync::broadcast;

use super::types::{GenerateRequest, JobId, JobProgressSnapshot, JobState as JobStatus, JobView};

const STATE_QUEUED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_COMPLETED: u8 = 2;
const STATE_FAILED: u8 = 3;
const STATE_CANCELLED: u8 = 4;

fn state_to_u8(state: JobStatus) -> u8 {
    match state {
        JobStatus::Queued => STATE_QUEUED,
        JobStatus::Running => STATE_RUNNING,
        JobStatus::Completed => STATE_COMPLETED,
        JobStatus::Failed => STATE_FAILED,
        JobStatus::Cancelled => STATE_CANCELLED,
    }
}

fn u8_to_state(v: u8) -> JobStatus {
    match v {
        STATE_RUNNING => JobStatus::Running,
        STATE_COMPLETED => JobStatus::Completed,
        STATE_FAILED => JobStatus::Failed,
        STATE_CANCELLED => JobStatus::Cancelled,
        _ => JobStatus::Queued,
    }
}

/// Mutable record for a single in-flight or completed job.
///
/// State and progress counters are atomics so route handlers never block on
/// the background task; the handful of fields that only change a few times
/// over a job's life (label, artifact ref, error) sit behind a `RwLock`.
pub struct JobRecord {
    id: JobId,
    pub request: GenerateRequest,
    state: AtomicU8,
    current: AtomicU64,
    total: AtomicU64,
    label: RwLock<Option<String>>,
    artifact_ref: RwLock<Option<String>>,
    error: RwLock<Option<String>>,
    generation_time_secs: RwLock<Option<f64>>,
    categories_used: RwLock<Vec<String>>,
    progress_tx: broadcast::Sender<JobProgressSnapshot>,
}

impl JobRecord {
    pub fn new(id: JobId, request: GenerateRequest) -> Self {
        let (progress_tx, _) = broadcast::channel(64);
        Self {
            id,
            request,
            state: AtomicU8::new(STATE_QUEUED),
            current: AtomicU64::new(0),
            total: AtomicU64::new(0),
            label: RwLock::new(None),
            artifact_ref: RwLock::new(None),
            error: RwLock::new(None),
            generation_time_secs: RwLock::new(None),
            categories_used: RwLock::new(Vec::new()),
            progress_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobStatus {
        u8_to_state(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: JobStatus) {
        self.state.store(state_to_u8(state), Ordering::Relaxed);
        self.broadcast_progress();
    }

    pub fn set_progress(&self, current: u64, total: u64, label: impl Into<String>) {
        self.current.store(current, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        match self.label.write() {
            Ok(mut guard) => *guard = Some(label.into()),
            Err(e) => tracing::error!("RwLock poisoned writing job label: {e}"),
        }
        self.broadcast_progress();
    }

    pub fn set_categories_used(&self, categories: Vec<String>) {
        match self.categories_used.write() {
            Ok(mut guard) => *guard = categories,
            Err(e) => tracing::error!("RwLock poisoned writing categories_used: {e}"),
        }
    }

    pub fn complete(&self, artifact_ref: impl Into<String>, generation_time_secs: f64) {
        match self.artifact_ref.write() {
            Ok(mut guard) => *guard = Some(artifact_ref.into()),
            Err(e) => tracing::error!("RwLock poisoned writing artifact_ref: {e}"),
        }
        match self.generation_time_secs.write() {
            Ok(mut guard) => *guard = Some(generation_time_secs),
            Err(e) => tracing::error!("RwLock poisoned writing generation_time_secs: {e}"),
        }
        self.set_state(JobStatus::Completed);
    }

    pub fn fail(&self, error: impl Into<String>) {
        match self.error.write() {
            Ok(mut guard) => *guard = Some(error.into()),
            Err(e) => tracing::error!("RwLock poisoned writing job error: {e}"),
        }
        self.set_state(JobStatus::Failed);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    pub fn snapshot(&self) -> JobProgressSnapshot {
        let current = self.current.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let percent = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        JobProgressSnapshot { current, total, percent }
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            state: self.state(),
            progress: self.snapshot(),
            label: self.label.read().ok().and_then(|g| g.clone()),
            artifact_ref: self.artifact_ref.read().ok().and_then(|g| g.clone()),
            error: self.error.read().ok().and_then(|g| g.clone()),
            generation_time_secs: self.generation_time_secs.read().ok().and_then(|g| *g),
            categories_used: self.categories_used.read().map(|g| g.clone()).unwrap_or_default(),
        }
    }

    fn broadcast_progress(&self) {
        let _ = self.progress_tx.send(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> GenerateRequest {
        GenerateRequest {
            prompt: "a cat".into(),
            categories: vec![],
            policy_tier: comfygen_core::PolicyTier::General,
            min_confidence: 0.3,
            client_id: None,
            seed: None,
        }
    }

    #[test]
    fn lifecycle_transitions_and_snapshots() {
        let record = JobRecord::new("job-1".into(), sample_request());
        assert_eq!(record.state(), JobStatus::Queued);

        record.set_state(JobStatus::Running);
        record.set_progress(5, 20, "denoising");
        let view = record.view();
        assert_eq!(view.state, JobStatus::Running);
        assert_eq!(view.progress.current, 5);
        assert_eq!(view.progress.total, 20);
        assert_eq!(view.label.as_deref(), Some("denoising"));

        record.complete("file:///artifacts/out.png", 4.2);
        let view = record.view();
        assert_eq!(view.state, JobStatus::Completed);
        assert_eq!(view.artifact_ref.as_deref(), Some("file:///artifacts/out.png"));
        assert_eq!(view.generation_time_secs, Some(4.2));
    }

    #[test]
    fn failure_records_error_message() {
        let record = JobRecord::new("job-2".into(), sample_request());
        record.fail("backend unreachable");
        let view = record.view();
        assert_eq!(view.state, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("backend unreachable"));
    }

    #[tokio::test]
    async fn subscribers_receive_progress_updates() {
        let record = JobRecord::new("job-3".into(), sample_request());
        let mut rx = record.subscribe();
        record.set_progress(1, 10, "starting");
        let update = rx.recv().await.unwrap();
        assert_eq!(update.current, 1);
        assert_eq!(update.total, 10);
    }
}
