//! cimatrix-state: external interfaces for the cimatrix pipeline
//!
//! This crate holds the side-effecting collaborators that outlive a single
//! build: the package index, the documentation host, the secret store and
//! the previous-build status used for notifications.
//!
//! ## Layer 0 - Interfaces/Persistence
//!
//! Focus: idempotent writes and trait contracts that the orchestration layer
//! can rely on regardless of backend.

mod env_secrets;
mod error;
pub mod fakes;
mod file_status;
pub mod storage_traits;

pub use env_secrets::EnvSecretStore;
pub use error::StorageError;
pub use file_status::FileStatusStore;
pub use storage_traits::{
    BuildStatus, Credentials, DocumentationHost, PackageArtifact, PackageIndex,
    PushOutcome, SecretStore, StatusRecord, StatusStore, StorageResult, UploadOutcome,
};
