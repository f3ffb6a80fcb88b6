// crates/server/src/routes/runs.rs
//! Favorites/ratings and recipe extraction endpoints (spec.md §6 "Favorites/
//! ratings" and "Recipe extraction"), backed by the Provenance Tracker
//! (spec.md 4.M).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use comfygen_core::{CompositionEngine, Recipe};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/{id}/favorite", post(favorite_run))
        .route("/runs/{id}/rate", post(rate_run))
        .route("/runs/{id}/recipe", get(get_recipe))
        .route("/runs/{id}/recompose", post(recompose))
}

#[derive(Debug, Serialize)]
struct FavoriteResponse {
    favorited: bool,
}

async fn favorite_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<FavoriteResponse>, ApiError> {
    state
        .provenance
        .as_ref()
        .ok_or_else(|| ApiError::RunNotFound(id.clone()))?
        .favorite_run(&id)
        .await
        .map_err(|_| ApiError::RunNotFound(id))?;
    Ok(Json(FavoriteResponse { favorited: true }))
}

#[derive(Debug, Deserialize)]
struct RateRequest {
    rating: u8,
}

#[derive(Debug, Serialize)]
struct RateResponse {
    rating: u8,
}

async fn rate_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RateRequest>,
) -> Result<Json<RateResponse>, ApiError> {
    if request.rating == 0 || request.rating > 5 {
        return Err(ApiError::BadRequest("rating must be between 1 and 5".into()));
    }
    state
        .provenance
        .as_ref()
        .ok_or_else(|| ApiError::RunNotFound(id.clone()))?
        .rate_run(&id, request.rating)
        .await
        .map_err(|_| ApiError::RunNotFound(id))?;
    Ok(Json(RateResponse { rating: request.rating }))
}

#[derive(Debug, Deserialize)]
struct ListRunsParams {
    #[serde(default)]
    min_rating: Option<u8>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    categories: Vec<String>,
    rating: Option<u8>,
    favorite: bool,
}

async fn list_runs(State(state): State<Arc<AppState>>, Query(params): Query<ListRunsParams>) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let provenance = state.provenance.as_ref().ok_or_else(|| ApiError::Internal("provenance unavailable".into()))?;
    let runs = provenance.top_rated(params.min_rating.unwrap_or(0), params.limit).await;

    let summaries: Vec<RunSummary> = runs
        .into_iter()
        .filter(|run| {
            params
                .category
                .as_ref()
                .map(|wanted| {
                    run.params
                        .get("categories")
                        .map(|categories| categories.split(',').any(|c| c == wanted))
                        .unwrap_or(false)
                })
                .unwrap_or(true)
        })
        .map(|run| RunSummary {
            run_id: run.run_id,
            categories: run
                .params
                .get("categories")
                .map(|c| c.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            rating: run.tags.get("rating").and_then(|r| r.parse().ok()),
            favorite: run.tags.get("favorite").map(|f| f == "true").unwrap_or(false),
        })
        .collect();

    Ok(Json(summaries))
}

async fn get_recipe(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Recipe>, ApiError> {
    let provenance = state.provenance.as_ref().ok_or_else(|| ApiError::RunNotFound(id.clone()))?;
    let bytes = provenance.recipe_artifact(&id).await.ok_or_else(|| ApiError::RunNotFound(id.clone()))?;
    let recipe: Recipe = serde_json::from_slice(&bytes).map_err(|e| ApiError::Internal(format!("stored recipe is malformed: {e}")))?;
    Ok(Json(recipe))
}

#[derive(Debug, Deserialize)]
struct RecomposeRequest {
    target_categories: Vec<String>,
    #[serde(default)]
    preserve_loras: bool,
    #[serde(default)]
    preserve_settings: bool,
}

async fn recompose(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RecomposeRequest>,
) -> Result<Json<Recipe>, ApiError> {
    if request.target_categories.is_empty() {
        return Err(ApiError::BadRequest("target_categories must not be empty".into()));
    }

    let provenance = state.provenance.as_ref().ok_or_else(|| ApiError::RunNotFound(id.clone()))?;
    let bytes = provenance.recipe_artifact(&id).await.ok_or_else(|| ApiError::RunNotFound(id.clone()))?;
    let original: Recipe = serde_json::from_slice(&bytes).map_err(|e| ApiError::Internal(format!("stored recipe is malformed: {e}")))?;

    let engine = CompositionEngine::new(&state.registry);
    let mut recomposed = engine.compose(&request.target_categories)?;

    if request.preserve_loras {
        recomposed.loras = original.loras.clone();
    }
    if request.preserve_settings {
        recomposed.steps = original.steps;
        recomposed.cfg = original.cfg;
        recomposed.width = original.width;
        recomposed.height = original.height;
        recomposed.sampler = original.sampler.clone();
        recomposed.scheduler = original.scheduler.clone();
        recomposed.denoise = original.denoise;
    }

    Ok(Json(recomposed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use clap::Parser;
    use tower::ServiceExt;

    async fn state_with_categories() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let categories_dir = dir.path().join("categories");
        tokio::fs::create_dir_all(&categories_dir).await.unwrap();
        tokio::fs::write(
            categories_dir.join("portrait.yaml"),
            "id: portrait\ntype: subject\ndisplay_name: Portrait\nkeywords:\n  primary: [\"portrait\"]\n",
        )
        .await
        .unwrap();

        let config = Config::parse_from([
            "comfygen-server",
            "--categories-dir",
            categories_dir.to_str().unwrap(),
            "--workflows-dir",
            dir.path().join("workflows").to_str().unwrap(),
            "--object-store-dir",
            dir.path().join("artifacts").to_str().unwrap(),
            "--enable-provenance",
        ]);
        AppState::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn favorite_unknown_run_is_not_found() {
        let app = router().with_state(state_with_categories().await);
        let response = app
            .oneshot(Request::builder().method("POST").uri("/runs/missing/favorite").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rate_run_rejects_out_of_range_rating() {
        let app = router().with_state(state_with_categories().await);
        let body = serde_json::json!({ "rating": 9 });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/runs/anything/rate")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recompose_requires_target_categories() {
        let app = router().with_state(state_with_categories().await);
        let body = serde_json::json!({ "target_categories": [] });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/runs/anything/recompose")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_runs_with_no_runs_is_empty() {
        let app = router().with_state(state_with_categories().await);
        let response = app
            .oneshot(Request::builder().uri("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
