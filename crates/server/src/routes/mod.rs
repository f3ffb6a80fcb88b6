// crates/server/src/routes/mod.rs
//! HTTP/WS surface (spec.md §6): assembles every sub-router under its
//! prefix and attaches shared state once at the top.

pub mod categories;
pub mod compose;
pub mod health;
pub mod jobs;
pub mod progress;
pub mod runs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the full route tree. Most surfaces live under `/api`; the
/// progress stream is nested separately under `/ws/jobs` to match its
/// `GET /ws/jobs/:id` contract.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", categories::router())
        .nest("/api", jobs::router())
        .nest("/api", compose::router())
        .nest("/api", runs::router())
        .nest("/ws/jobs", progress::router())
        .with_state(state)
}
