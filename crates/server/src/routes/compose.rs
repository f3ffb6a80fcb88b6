// crates/server/src/routes/compose.rs
//! `POST /api/compose` (spec.md §6 "Compose endpoint"): resolves free text
//! plus explicit categories into a recipe without submitting it for
//! generation, returning the recipe alongside an explanation block that
//! exposes every intermediate decision (spec.md 4.F/4.H provenance).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use comfygen_core::{hybrid_parser, CompositionEngine, PolicyTier, Recipe};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/compose", post(compose))
}

#[derive(Debug, Deserialize)]
struct ComposeRequest {
    #[serde(default)]
    text: String,
    /// `dry_run` is accepted for parity with the generation request shape
    /// but has no effect here: `/api/compose` never submits to the
    /// backend regardless of this flag.
    #[serde(default)]
    dry_run: bool,
    #[serde(default = "default_max_categories")]
    max_categories: usize,
    #[serde(default = "default_min_confidence")]
    min_confidence: f64,
    #[serde(default = "default_policy_tier")]
    policy_tier: PolicyTier,
}

fn default_max_categories() -> usize {
    5
}

fn default_min_confidence() -> f64 {
    comfygen_core::keyword_classifier::DEFAULT_MIN_CONFIDENCE
}

fn default_policy_tier() -> PolicyTier {
    PolicyTier::General
}

#[derive(Debug, Serialize)]
struct Explanation {
    summary: String,
    explicit_tags: Vec<String>,
    inferred: Vec<InferredCategory>,
    residual_text: String,
    final_categories: Vec<String>,
    steps: Vec<comfygen_core::CompositionStep>,
    warnings: Vec<String>,
    suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InferredCategory {
    id: String,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct ComposeResponse {
    recipe: Recipe,
    explanation: Explanation,
}

async fn compose(State(state): State<Arc<AppState>>, Json(request): Json<ComposeRequest>) -> Result<Json<ComposeResponse>, ApiError> {
    if request.max_categories == 0 {
        return Err(ApiError::BadRequest("max_categories must be >= 1".into()));
    }
    if !(0.0..=1.0).contains(&request.min_confidence) {
        return Err(ApiError::BadRequest("min_confidence must be in [0, 1]".into()));
    }

    let parsed = hybrid_parser::parse(&request.text, &state.registry, state.llm.as_deref(), request.min_confidence).await;

    let mut final_categories = parsed.explicit_categories.clone();
    for (id, _confidence) in &parsed.inferred_categories {
        if !final_categories.contains(id) {
            final_categories.push(id.clone());
        }
    }
    final_categories.truncate(request.max_categories);

    let mut suggestions = Vec::new();
    for tag in &parsed.unmatched_tags {
        suggestions.push(format!("no category matched @{}; check spelling or browse /api/categories/search", tag.ident));
    }

    if final_categories.is_empty() {
        return Err(ApiError::BadRequest("no categories resolved from text".into()));
    }

    let known: Vec<_> = final_categories.iter().filter_map(|id| state.registry.get(id)).collect();
    let policy_result = state.policy.check(&known, request.policy_tier);
    if !policy_result.allowed {
        return Err(ApiError::PolicyViolation(policy_result.violations));
    }

    let engine = CompositionEngine::new(&state.registry);
    let recipe = engine.compose(&final_categories)?;

    let summary = format!(
        "resolved {} categor{} ({} explicit, {} inferred) into recipe '{}'",
        final_categories.len(),
        if final_categories.len() == 1 { "y" } else { "ies" },
        parsed.explicit_categories.len(),
        final_categories.len() - parsed.explicit_categories.len(),
        recipe.id
    );

    let explanation = Explanation {
        summary,
        explicit_tags: parsed.explicit_categories,
        inferred: parsed
            .inferred_categories
            .into_iter()
            .map(|(id, confidence)| InferredCategory { id, confidence })
            .collect(),
        residual_text: parsed.remaining_prompt,
        final_categories,
        steps: recipe.composition_steps.clone(),
        warnings: recipe.warnings.clone(),
        suggestions,
    };

    let _ = request.dry_run;
    Ok(Json(ComposeResponse { recipe, explanation }))
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
        ]);
        AppState::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn compose_with_explicit_tag_resolves_and_returns_explanation() {
        let app = router().with_state(state_with_categories().await);
        let body = serde_json::json!({ "text": "@portrait a woman" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/compose")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn compose_with_no_matches_is_bad_request() {
        let app = router().with_state(state_with_categories().await);
        let body = serde_json::json!({ "text": "nothing relevant here" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/compose")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn compose_rejects_zero_max_categories() {
        let app = router().with_state(state_with_categories().await);
        let body = serde_json::json!({ "text": "@portrait", "max_categories": 0 });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/compose")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
