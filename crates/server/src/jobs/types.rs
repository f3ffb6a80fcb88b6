// crates/server/src/jobs/types.rs
//! Types for the job scheduler (spec.md 4.L, Job in §3).

use serde::{Deserialize, Serialize};

use comfygen_core::PolicyTier;

/// Opaque job identifier.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

/// The original request a job was submitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Free text to resolve via the hybrid parser. Either this or
    /// `categories` (or both) must be non-empty.
    #[serde(default)]
    pub prompt: String,
    /// Explicit category ids, unioned with anything the hybrid parser
    /// resolves from `prompt`.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_policy_tier")]
    pub policy_tier: PolicyTier,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Sampler seed. Only applied to sampler nodes when non-negative;
    /// `None` or a negative value leaves the workflow's own seed in place.
    #[serde(default)]
    pub seed: Option<i64>,
}

fn default_policy_tier() -> PolicyTier {
    PolicyTier::General
}

fn default_min_confidence() -> f64 {
    comfygen_core::keyword_classifier::DEFAULT_MIN_CONFIDENCE
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobProgressSnapshot {
    pub current: u64,
    pub total: u64,
    pub percent: f64,
}

/// A point-in-time view of a job, returned by `GET /api/jobs/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub state: JobState,
    pub progress: JobProgressSnapshot,
    pub label: Option<String>,
    pub artifact_ref: Option<String>,
    pub error: Option<String>,
    pub generation_time_secs: Option<f64>,
    pub categories_used: Vec<String>,
}
