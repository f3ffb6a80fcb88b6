// crates/server/src/objectstore/mod.rs
//! Object store interface for generated artifacts (spec.md §6 external
//! interfaces). The production store (S3-compatible, with credentials and
//! bucket policy) is out of scope; [`LocalObjectStore`] is the default,
//! filesystem-backed implementation used to keep the service runnable
//! end-to-end.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("failed to write artifact {filename}: {source}")]
    Write {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

/// Persists generated artifact bytes and returns a retrievable reference.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, filename: &str, bytes: &[u8]) -> Result<String, ObjectStoreError>;
}

/// Writes artifacts under a configured directory and returns a `file://`
/// reference. Sufficient for local development and tests; a real deployment
/// would swap in an S3-backed implementation behind the same trait.
pub struct LocalObjectStore {
    dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, filename: &str, bytes: &[u8]) -> Result<String, ObjectStoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| ObjectStoreError::Write {
            filename: filename.to_string(),
            source: e,
        })?;
        let path = self.path_for(filename);
        tokio::fs::write(&path, bytes).await.map_err(|e| ObjectStoreError::Write {
            filename: filename.to_string(),
            source: e,
        })?;
        Ok(format!("file://{}", path.display()))
    }
}

/// Returns an error for every `put`, used when no object store is
/// configured and artifacts are expected to fail loudly rather than vanish
/// silently.
pub struct NullObjectStore;

#[async_trait]
impl ObjectStore for NullObjectStore {
    async fn put(&self, filename: &str, _bytes: &[u8]) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Write {
            filename: filename.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Unsupported, "no object store configured"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let url = store.put("out.png", b"fake-bytes").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(dir.path().join("out.png").exists());
    }

    #[tokio::test]
    async fn null_store_always_errors() {
        let store = NullObjectStore;
        assert!(store.put("out.png", b"x").await.is_err());
    }
}
