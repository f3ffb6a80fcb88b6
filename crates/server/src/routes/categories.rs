// crates/server/src/routes/categories.rs
//! Category browse endpoints (spec.md §6 "Category browse").

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use comfygen_core::Category;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/categories/search", get(search_categories))
        .route("/categories/{id}", get(get_category))
}

#[derive(Debug, Serialize)]
struct CategorySummary {
    id: String,
    display_name: String,
    #[serde(rename = "type")]
    category_type: comfygen_core::CategoryType,
    policy_tier: comfygen_core::PolicyTier,
}

impl From<&Category> for CategorySummary {
    fn from(c: &Category) -> Self {
        Self {
            id: c.id.clone(),
            display_name: c.display_name.clone(),
            category_type: c.category_type,
            policy_tier: c.policy_tier,
        }
    }
}

async fn list_categories(State(state): State<Arc<AppState>>) -> Json<Vec<CategorySummary>> {
    let summaries: Vec<CategorySummary> = state.registry.all().map(CategorySummary::from).collect();
    Json(summaries)
}

async fn get_category(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Category>, ApiError> {
    state
        .registry
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::CategoryNotFound(id))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
}

async fn search_categories(State(state): State<Arc<AppState>>, Query(params): Query<SearchParams>) -> Json<Vec<CategorySummary>> {
    let summaries: Vec<CategorySummary> = state.registry.search(&params.q).into_iter().map(CategorySummary::from).collect();
    Json(summaries)
}
