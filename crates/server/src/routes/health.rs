// crates/server/src/routes/health.rs
//! Health check endpoint for the API.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub categories_loaded: usize,
}

/// GET /api/health - reports process status, version, uptime, and how many
/// category definitions loaded at startup.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        categories_loaded: state.registry.len(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use clap::Parser;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse_from([
            "comfygen-server",
            "--categories-dir",
            dir.path().join("categories").to_str().unwrap(),
            "--workflows-dir",
            dir.path().join("workflows").to_str().unwrap(),
            "--object-store-dir",
            dir.path().join("artifacts").to_str().unwrap(),
        ]);
        let state = AppState::new(config).await.unwrap();
        let app = router().with_state(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
