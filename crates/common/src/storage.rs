//! Key-value persistence
//!
//! The token store persists one JSON blob per logical store (e.g.
//! `calendar_connections`) through the [`KeyValueStore`] trait.
//! [`FileKeyValueStore`] keeps one file per key under a root directory;
//! [`MemoryKeyValueStore`] backs tests.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CommonError, CommonResult};

/// Minimal key-value contract: read, replace, delete whole values.
///
/// Read-modify-write cycles are the caller's responsibility.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> CommonResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> CommonResult<()>;
    async fn delete(&self, key: &str) -> CommonResult<()>;
}

/// File-backed store: one `<key>.json` file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> CommonResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CommonError::Storage(format!("invalid store key: {key:?}")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> CommonResult<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CommonError::Storage(format!("read {}: {err}", path.display()))),
        }
    }

    async fn put(&self, key: &str, value: &str) -> CommonResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| CommonError::Storage(format!("create {}: {err}", self.root.display())))?;

        // Write-then-rename so readers never observe a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|err| CommonError::Storage(format!("write {}: {err}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| CommonError::Storage(format!("rename {}: {err}", path.display())))?;

        debug!(key, bytes = value.len(), "persisted store blob");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CommonResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CommonError::Storage(format!("delete {}: {err}", path.display()))),
        }
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> CommonResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> CommonResult<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CommonResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
