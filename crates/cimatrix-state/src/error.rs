//! Error types for cimatrix-state

use thiserror::Error;

/// Errors raised by the external-interface backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Artifact has no files to upload
    #[error("artifact {name} {version} contains no files")]
    EmptyArtifact { name: String, version: String },

    /// Site directory to publish does not exist
    #[error("site directory not found: {path}")]
    SiteNotFound { path: String },

    /// Secret could not be resolved
    #[error("secret unavailable: {0}")]
    SecretUnavailable(String),

    /// Backend transport failed before producing an outcome
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
