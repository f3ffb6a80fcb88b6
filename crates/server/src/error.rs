// crates/server/src/error.rs
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

use comfygen_core::{CompositionError, ExecutorError, PolicyViolation, RegistryError};

/// Structured JSON error response for API errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<PolicyViolationView>,
}

#[derive(Debug, Serialize)]
pub struct PolicyViolationView {
    pub category_id: String,
    pub required_tier: String,
    pub requested_tier: String,
}

impl From<&PolicyViolation> for PolicyViolationView {
    fn from(v: &PolicyViolation) -> Self {
        Self {
            category_id: v.category_id.clone(),
            required_tier: format!("{:?}", v.required_tier).to_lowercase(),
            requested_tier: format!("{:?}", v.requested_tier).to_lowercase(),
        }
    }
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            violations: Vec::new(),
        }
    }
}

/// API error types, aggregated from every subsystem and mapped to the
/// status codes spec.md §7's error table implies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("category not found: {0}")]
    CategoryNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error("policy violation")]
    PolicyViolation(Vec<PolicyViolation>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::JobNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(format!("job not found: {id}")),
            ),
            ApiError::CategoryNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(format!("category not found: {id}")),
            ),
            ApiError::RunNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(format!("run not found: {id}")),
            ),
            ApiError::Composition(e) => {
                tracing::warn!(error = %e, "composition failed");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string()))
            }
            ApiError::PolicyViolation(violations) => {
                tracing::warn!(violation_count = violations.len(), "policy denied request");
                let mut resp = ErrorResponse::new("content policy violation");
                resp.violations = violations.iter().map(PolicyViolationView::from).collect();
                (StatusCode::FORBIDDEN, resp)
            }
            ApiError::Registry(e) => {
                tracing::error!(error = %e, "registry error");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e.to_string()))
            }
            ApiError::Executor(e) => {
                let status = match e {
                    ExecutorError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
                    ExecutorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::error!(error = %e, "backend executor error");
                (status, ErrorResponse::new(e.to_string()))
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone())),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(msg.clone()))
            }
        };

        (status, Json(body)).into_response()
    }
}
