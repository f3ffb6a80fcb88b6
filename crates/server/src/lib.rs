// crates/server/src/lib.rs
//! comfygen server library.
//!
//! Provides the Axum-based HTTP/WS surface (spec.md §6) over the Job
//! Scheduler, Progress Proxy, and Provenance & Policy subsystems.

pub mod config;
pub mod error;
pub mod jobs;
pub mod objectstore;
pub mod progress;
pub mod provenance;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full Axum application: routes plus CORS and request tracing.
pub fn create_app(state: Arc<AppState>) -> Router {
    api_routes(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
