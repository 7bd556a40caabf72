use crate::domain::metadata::Metadata;
use crate::ports::storage::{ListPage, ObjectStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const OBJECTS_DIR: &str = "objects";
const METADATA_DIR: &str = "metadata";

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    metadata: Metadata,
}

/// Object store on the local filesystem.
///
/// Object bodies live under `{root}/objects/{key}`; content type and metadata
/// go to a JSON sidecar under `{root}/metadata/{key}.json` so listings only
/// ever see real objects.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn checked_key(key: &str) -> Result<&Path, StorageError> {
        let path = Path::new(key);
        let plain = !key.is_empty()
            && !key.ends_with('/')
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if plain {
            Ok(path)
        } else {
            Err(StorageError::InvalidKey(key.to_string()))
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(OBJECTS_DIR).join(Self::checked_key(key)?))
    }

    fn sidecar_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.join(METADATA_DIR).join(Self::checked_key(key)?);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".json");
        path.set_file_name(name);
        Ok(path)
    }

    /// Every object key under the objects directory, sorted.
    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        let base = self.root.join(OBJECTS_DIR);
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&base) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Content type and metadata recorded for `key`.
    pub async fn head(&self, key: &str) -> Result<(String, Metadata), StorageError> {
        let raw = match tokio::fs::read(self.sidecar_path(key)?).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Backend(format!("corrupt sidecar for {}: {}", key, e)))?;
        Ok((sidecar.content_type, sidecar.metadata))
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
            metadata,
        })
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        write_file(&self.object_path(key)?, &body).await?;
        write_file(&self.sidecar_path(key)?, &sidecar).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        match tokio::fs::read(self.object_path(key)?).await {
            Ok(body) => Ok(Bytes::from(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.object_path(key)?).await?)
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let mut matching = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| cursor.as_deref().map_or(true, |after| key.as_str() > after));
        let keys: Vec<String> = matching.by_ref().take(limit).collect();
        let truncated = matching.next().is_some();
        let cursor = if truncated { keys.last().cloned() } else { None };
        Ok(ListPage {
            keys,
            cursor,
            truncated,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        remove_if_present(&self.object_path(key)?).await?;
        remove_if_present(&self.sidecar_path(key)?).await
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}
