//! External interface definitions for cimatrix
//!
//! These traits define the collaborators the pipeline talks to after the
//! matrix has joined:
//! - `PackageIndex`: package upload (`Published` / `AlreadyExists` / `Rejected`)
//! - `DocumentationHost`: force-push of a rendered site to a hosting branch
//! - `SecretStore`: opaque source of upload credentials
//! - `StatusStore`: previous build status, used by change-based notifications
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for backend operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// PackageIndex
// ---------------------------------------------------------------------------

/// A built distributable ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageArtifact {
    /// Distribution name.
    pub name: String,
    /// Version being published (tag with any `v` prefix stripped).
    pub version: String,
    /// Files produced by the package build.
    pub files: Vec<PathBuf>,
}

impl PackageArtifact {
    pub fn new(name: impl Into<String>, version: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            files,
        }
    }

    /// Index key: `name==version`.
    pub fn coordinate(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

/// Upload credentials yielded by a [`SecretStore`].
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a single upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The version was written to the index by this call.
    Published,
    /// The version was already present; nothing was written.
    AlreadyExists,
    /// The index refused the upload.
    Rejected(String),
}

/// Package index.
///
/// Guarantees:
/// - At most one `upload` for a given coordinate returns `Published`.
/// - Every later upload of the same coordinate returns `AlreadyExists`.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Upload an artifact with the given credentials.
    async fn upload(
        &self,
        artifact: &PackageArtifact,
        credentials: &Credentials,
    ) -> StorageResult<UploadOutcome>;
}

// ---------------------------------------------------------------------------
// DocumentationHost
// ---------------------------------------------------------------------------

/// Result of pushing a rendered site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PushOutcome {
    Pushed,
    Rejected(String),
}

/// Documentation host: the hosting branch always holds only the latest push.
#[async_trait]
pub trait DocumentationHost: Send + Sync {
    /// Replace the content of `target_branch` with the files under `site_dir`.
    async fn force_push(&self, site_dir: &std::path::Path, target_branch: &str)
        -> StorageResult<PushOutcome>;
}

// ---------------------------------------------------------------------------
// SecretStore
// ---------------------------------------------------------------------------

/// Opaque, read-only credential source.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn credentials(&self) -> StorageResult<Credentials>;
}

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

/// Terminal status of a whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Passed,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_success(self) -> bool {
        matches!(self, BuildStatus::Passed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Passed => "passed",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status recorded for the most recent build of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub branch: String,
    pub status: BuildStatus,
    pub build_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Record stamped with the current time.
    pub fn now(branch: impl Into<String>, status: BuildStatus, build_id: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            status,
            build_id: build_id.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Previous-build status persistence, keyed by branch.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Most recent recorded status for `branch`, if any.
    async fn previous(&self, branch: &str) -> StorageResult<Option<StatusRecord>>;

    /// Record the status of the build that just finished.
    async fn record(&self, record: StatusRecord) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("deployer", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("deployer"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(creds.password(), "hunter2");
    }

    #[test]
    fn test_artifact_coordinate() {
        let artifact = PackageArtifact::new("easypy", "1.2.3", vec![]);
        assert_eq!(artifact.coordinate(), "easypy==1.2.3");
    }

    #[test]
    fn test_build_status_display() {
        assert_eq!(BuildStatus::Passed.to_string(), "passed");
        assert!(BuildStatus::Passed.is_success());
        assert!(!BuildStatus::Cancelled.is_success());
    }
}
