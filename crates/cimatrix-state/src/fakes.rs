//! In-memory fakes for the external interfaces (testing only)
//!
//! Provides `MemoryPackageIndex`, `MemoryDocHost`, `StaticSecretStore` and
//! `MemoryStatusStore` that satisfy the trait contracts without any network
//! or credentials.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryPackageIndex
// ---------------------------------------------------------------------------

/// In-memory package index backed by a `HashMap<coordinate, artifact>`.
///
/// The check-and-insert happens under one lock, so racing uploads of the
/// same coordinate yield exactly one `Published`.
#[derive(Debug, Default)]
pub struct MemoryPackageIndex {
    packages: Mutex<HashMap<String, PackageArtifact>>,
    attempts: AtomicUsize,
    reject_with: Option<String>,
}

impl MemoryPackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index that refuses every upload with `reason`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Seed the index with an already-published artifact.
    pub fn with_existing(self, artifact: PackageArtifact) -> Self {
        self.packages
            .lock()
            .unwrap()
            .insert(artifact.coordinate(), artifact);
        self
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        let key = format!("{}=={}", name, version);
        self.packages.lock().unwrap().contains_key(&key)
    }

    /// Number of distinct coordinates stored.
    pub fn len(&self) -> usize {
        self.packages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total upload calls, including duplicates and rejections.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageIndex for MemoryPackageIndex {
    async fn upload(
        &self,
        artifact: &PackageArtifact,
        credentials: &Credentials,
    ) -> StorageResult<UploadOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = &self.reject_with {
            return Ok(UploadOutcome::Rejected(reason.clone()));
        }
        if credentials.username.is_empty() {
            return Ok(UploadOutcome::Rejected("missing username".to_string()));
        }
        if artifact.files.is_empty() {
            return Err(StorageError::EmptyArtifact {
                name: artifact.name.clone(),
                version: artifact.version.clone(),
            });
        }

        let mut packages = self.packages.lock().unwrap();
        let key = artifact.coordinate();
        if packages.contains_key(&key) {
            return Ok(UploadOutcome::AlreadyExists);
        }
        packages.insert(key, artifact.clone());
        Ok(UploadOutcome::Published)
    }
}

// ---------------------------------------------------------------------------
// MemoryDocHost
// ---------------------------------------------------------------------------

/// In-memory documentation host.
///
/// Each branch holds only the file list of the latest push (relative paths,
/// sorted), mirroring force-push semantics.
#[derive(Debug, Default)]
pub struct MemoryDocHost {
    branches: Mutex<BTreeMap<String, Vec<PathBuf>>>,
    pushes: AtomicUsize,
    reject_with: Option<String>,
}

impl MemoryDocHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Files currently on `branch`.
    pub fn branch_files(&self, branch: &str) -> Option<Vec<PathBuf>> {
        self.branches.lock().unwrap().get(branch).cloned()
    }

    /// Number of accepted pushes.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentationHost for MemoryDocHost {
    async fn force_push(&self, site_dir: &Path, target_branch: &str) -> StorageResult<PushOutcome> {
        if let Some(reason) = &self.reject_with {
            return Ok(PushOutcome::Rejected(reason.clone()));
        }
        if !site_dir.is_dir() {
            return Err(StorageError::SiteNotFound {
                path: site_dir.display().to_string(),
            });
        }

        let mut files = Vec::new();
        collect_files(site_dir, site_dir, &mut files)?;
        files.sort();

        self.branches
            .lock()
            .unwrap()
            .insert(target_branch.to_string(), files);
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(PushOutcome::Pushed)
    }
}

// ---------------------------------------------------------------------------
// StaticSecretStore
// ---------------------------------------------------------------------------

/// Secret store that always yields the same credentials, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    credentials: Option<Credentials>,
}

impl StaticSecretStore {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some(Credentials::new(username, password)),
        }
    }

    /// A store with nothing configured.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn credentials(&self) -> StorageResult<Credentials> {
        self.credentials
            .clone()
            .ok_or_else(|| StorageError::SecretUnavailable("no credentials configured".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusStore
// ---------------------------------------------------------------------------

/// In-memory status store backed by a `HashMap<branch, StatusRecord>`.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn previous(&self, branch: &str) -> StorageResult<Option<StatusRecord>> {
        Ok(self.records.lock().unwrap().get(branch).cloned())
    }

    async fn record(&self, record: StatusRecord) -> StorageResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.branch.clone(), record);
        Ok(())
    }
}
