// crates/server/src/routes/jobs.rs
//! Generation lifecycle endpoints (spec.md §6 "Generation lifecycle").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ApiError;
use crate::jobs::{GenerateRequest, JobId, JobView};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate", post(generate))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    job_id: JobId,
}

async fn generate(State(state): State<Arc<AppState>>, Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    let job_id = state.scheduler.submit(request);
    Json(GenerateResponse { job_id })
}

async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<JobView>, ApiError> {
    state.scheduler.get(&id).map(Json).ok_or_else(|| ApiError::JobNotFound(id))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<CancelResponse>, ApiError> {
    if !state.scheduler.cancel(&id) {
        return Err(ApiError::JobNotFound(id));
    }
    Ok(Json(CancelResponse { cancelled: true }))
}
