//! JSON-file backed [`StatusStore`].
//!
//! One file holds the latest [`StatusRecord`] per branch. Writes go to a
//! sibling temp file and are renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage_traits::{StatusRecord, StatusStore, StorageResult};

/// Status store persisted as `{ "<branch>": StatusRecord, ... }`.
#[derive(Debug)]
pub struct FileStatusStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<BTreeMap<String, StatusRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn previous(&self, branch: &str) -> StorageResult<Option<StatusRecord>> {
        let _guard = self.lock.lock().await;
        let records = self.load().await?;
        Ok(records.get(branch).cloned())
    }

    async fn record(&self, record: StatusRecord) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        debug!(branch = %record.branch, status = %record.status, "recording build status");
        records.insert(record.branch.clone(), record);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&records)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
