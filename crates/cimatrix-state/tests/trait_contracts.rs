//! Trait contract tests for PackageIndex, DocumentationHost, SecretStore and
//! StatusStore.
//!
//! These tests verify the behavioral contracts of the interface traits
//! using in-memory fakes and the file-backed status store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use cimatrix_state::fakes::{MemoryDocHost, MemoryPackageIndex, MemoryStatusStore, StaticSecretStore};
use cimatrix_state::storage_traits::*;
use cimatrix_state::{FileStatusStore, StorageError};

fn artifact(version: &str) -> PackageArtifact {
    PackageArtifact::new(
        "easypy",
        version,
        vec![PathBuf::from(format!("dist/easypy-{}.tar.gz", version))],
    )
}

fn creds() -> Credentials {
    Credentials::new("deployer", "s3cret")
}

// ===========================================================================
// PackageIndex contract tests
// ===========================================================================

#[tokio::test]
async fn index_first_upload_publishes() {
    let index = MemoryPackageIndex::new();
    let outcome = index.upload(&artifact("1.2.3"), &creds()).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Published);
    assert!(index.contains("easypy", "1.2.3"));
}

#[tokio::test]
async fn index_second_upload_already_exists() {
    let index = MemoryPackageIndex::new();
    index.upload(&artifact("1.2.3"), &creds()).await.unwrap();
    let outcome = index.upload(&artifact("1.2.3"), &creds()).await.unwrap();

    assert_eq!(outcome, UploadOutcome::AlreadyExists);
    assert_eq!(index.len(), 1);
    assert_eq!(index.attempts(), 2);
}

#[tokio::test]
async fn index_distinct_versions_both_publish() {
    let index = MemoryPackageIndex::new();
    let a = index.upload(&artifact("1.0.0"), &creds()).await.unwrap();
    let b = index.upload(&artifact("1.0.1"), &creds()).await.unwrap();

    assert_eq!(a, UploadOutcome::Published);
    assert_eq!(b, UploadOutcome::Published);
    assert_eq!(index.len(), 2);
}

#[tokio::test]
async fn index_concurrent_uploads_publish_once() {
    let index = Arc::new(MemoryPackageIndex::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let index = Arc::clone(&index);
        handles.push(tokio::spawn(async move {
            index.upload(&artifact("2.0.0"), &creds()).await.unwrap()
        }));
    }

    let mut published = 0;
    for handle in handles {
        if handle.await.unwrap() == UploadOutcome::Published {
            published += 1;
        }
    }

    assert_eq!(published, 1);
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn index_rejecting_returns_reason() {
    let index = MemoryPackageIndex::rejecting("403 forbidden");
    let outcome = index.upload(&artifact("1.0.0"), &creds()).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Rejected("403 forbidden".to_string()));
    assert!(index.is_empty());
}

#[tokio::test]
async fn index_empty_artifact_is_error() {
    let index = MemoryPackageIndex::new();
    let empty = PackageArtifact::new("easypy", "1.0.0", vec![]);
    let err = index.upload(&empty, &creds()).await.unwrap_err();

    assert!(matches!(err, StorageError::EmptyArtifact { .. }));
}

#[tokio::test]
async fn index_seeded_version_already_exists() {
    let index = MemoryPackageIndex::new().with_existing(artifact("0.9.0"));
    let outcome = index.upload(&artifact("0.9.0"), &creds()).await.unwrap();

    assert_eq!(outcome, UploadOutcome::AlreadyExists);
}

// ===========================================================================
// DocumentationHost contract tests
// ===========================================================================

#[tokio::test]
async fn doc_host_push_replaces_branch_content() {
    let host = MemoryDocHost::new();

    let first = tempfile::tempdir().unwrap();
    std::fs::write(first.path().join("old.html"), "old").unwrap();
    host.force_push(first.path(), "gh-pages").await.unwrap();

    let second = tempfile::tempdir().unwrap();
    std::fs::write(second.path().join("index.html"), "new").unwrap();
    let outcome = host.force_push(second.path(), "gh-pages").await.unwrap();

    assert_eq!(outcome, PushOutcome::Pushed);
    assert_eq!(
        host.branch_files("gh-pages").unwrap(),
        vec![PathBuf::from("index.html")]
    );
    assert_eq!(host.push_count(), 2);
}

#[tokio::test]
async fn doc_host_missing_site_is_error() {
    let host = MemoryDocHost::new();
    let err = host
        .force_push(std::path::Path::new("/definitely/not/here"), "gh-pages")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::SiteNotFound { .. }));
}

#[tokio::test]
async fn doc_host_rejecting_leaves_branch_untouched() {
    let host = MemoryDocHost::rejecting("protected branch");
    let site = tempfile::tempdir().unwrap();
    let outcome = host.force_push(site.path(), "gh-pages").await.unwrap();

    assert_eq!(outcome, PushOutcome::Rejected("protected branch".to_string()));
    assert!(host.branch_files("gh-pages").is_none());
}

// ===========================================================================
// SecretStore contract tests
// ===========================================================================

#[tokio::test]
async fn secret_store_yields_credentials() {
    let store = StaticSecretStore::new("deployer", "s3cret");
    let creds = store.credentials().await.unwrap();

    assert_eq!(creds.username, "deployer");
    assert_eq!(creds.password(), "s3cret");
}

#[tokio::test]
async fn secret_store_empty_is_unavailable() {
    let err = StaticSecretStore::empty().credentials().await.unwrap_err();
    assert!(matches!(err, StorageError::SecretUnavailable(_)));
}

// ===========================================================================
// StatusStore contract tests
// ===========================================================================

fn status(branch: &str, status: BuildStatus, build_id: &str) -> StatusRecord {
    StatusRecord {
        branch: branch.to_string(),
        status,
        build_id: build_id.to_string(),
        recorded_at: Utc::now(),
    }
}

async fn exercise_status_store(store: &dyn StatusStore) {
    assert!(store.previous("trunk").await.unwrap().is_none());

    store
        .record(status("trunk", BuildStatus::Passed, "b1"))
        .await
        .unwrap();
    store
        .record(status("feature", BuildStatus::Failed, "b2"))
        .await
        .unwrap();
    store
        .record(status("trunk", BuildStatus::Failed, "b3"))
        .await
        .unwrap();

    let trunk = store.previous("trunk").await.unwrap().unwrap();
    assert_eq!(trunk.status, BuildStatus::Failed);
    assert_eq!(trunk.build_id, "b3");

    let feature = store.previous("feature").await.unwrap().unwrap();
    assert_eq!(feature.build_id, "b2");
}

#[tokio::test]
async fn memory_status_store_contract() {
    exercise_status_store(&MemoryStatusStore::new()).await;
}

#[tokio::test]
async fn file_status_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStatusStore::new(dir.path().join("state").join("status.json"));
    exercise_status_store(&store).await;
}

#[tokio::test]
async fn file_status_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");

    FileStatusStore::new(&path)
        .record(status("trunk", BuildStatus::Passed, "b1"))
        .await
        .unwrap();

    let reopened = FileStatusStore::new(&path);
    let record = reopened.previous("trunk").await.unwrap().unwrap();
    assert_eq!(record.status, BuildStatus::Passed);
}
