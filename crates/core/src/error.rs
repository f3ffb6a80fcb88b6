use std::path::PathBuf;
use thiserror::Error;

/// Errors loading categories or workflow manifests from disk.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry directory not found: {path}")]
    DirNotFound { path: PathBuf },

    #[error("permission denied reading registry directory: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed definition in {path}: {message}")]
    MalformedDefinition { path: PathBuf, message: String },

    #[error("unsupported schema version {version} in {path}")]
    UnsupportedSchemaVersion { path: PathBuf, version: String },

    #[error("unknown id: {id}")]
    NotFound { id: String },
}

impl RegistryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::DirNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors raised while composing a recipe from matched categories.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("unknown category id: {id}")]
    UnknownCategory { id: String },

    #[error("category conflict: {a} conflicts with {b}")]
    CategoryConflict { a: String, b: String },

    #[error("category {id} requires {required}, which was not present")]
    MissingRequirement { id: String, required: String },

    #[error("too many categories of type {category_type}: {count} exceeds max {max}")]
    TooManyOfType {
        category_type: String,
        count: u32,
        max: u32,
    },

    #[error("no categories matched the prompt")]
    NoCategoriesMatched,

    #[error("no workflow available for subject type {subject_type}")]
    NoWorkflowAvailable { subject_type: String },
}

/// Errors raised while enforcing the content policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("content policy violation: {reason}")]
    Violation { reason: String },
}

/// Errors talking to the ComfyUI backend.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("backend unreachable at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend returned error status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("job {job_id} was rejected by the backend: {reason}")]
    Rejected { job_id: String, reason: String },

    #[error("job {job_id} timed out after {elapsed_secs}s")]
    Timeout { job_id: String, elapsed_secs: u64 },

    #[error("job {job_id} failed on the backend: {reason}")]
    ExecutionFailed { job_id: String, reason: String },

    #[error("malformed response from backend: {message}")]
    MalformedResponse { message: String },

    #[error("node {node_id} with class_type {class_type} missing from workflow")]
    NodeNotFound { node_id: String, class_type: String },
}

/// Errors from the optional LLM intent parser.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM provider {provider} not configured: {reason}")]
    NotAvailable { provider: String, reason: String },

    #[error("LLM request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("LLM returned malformed output: {message}")]
    InvalidFormat { message: String },

    #[error("LLM rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_io_classification() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err = RegistryError::io("/categories", io_err);
        assert!(matches!(err, RegistryError::DirNotFound { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RegistryError::io("/categories", io_err);
        assert!(matches!(err, RegistryError::PermissionDenied { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = RegistryError::io("/categories", io_err);
        assert!(matches!(err, RegistryError::Io { .. }));
    }

    #[test]
    fn composition_error_display() {
        let err = CompositionError::CategoryConflict {
            a: "nsfw".into(),
            b: "child".into(),
        };
        assert!(err.to_string().contains("conflicts with"));
    }
}
