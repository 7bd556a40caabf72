use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

use crate::domain::metadata::Metadata;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Opaque continuation token; `None` when the listing is exhausted.
    pub cursor: Option<String>,
    pub truncated: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `key`, replacing anything already there.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> Result<(), StorageError>;

    /// Upload a local file to `key`.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        let body = tokio::fs::read(path).await?;
        self.put(key, Bytes::from(body), content_type, metadata).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys under `prefix` in lexicographic order, at most `limit` per page.
    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Human-readable backend name for logs and health output.
    fn describe(&self) -> String;
}
