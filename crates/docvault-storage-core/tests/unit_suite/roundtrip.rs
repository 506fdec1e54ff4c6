//! Round-trip tests.
//!
//! Upload, download, delete and metadata operations through the orchestrator
//! against the local filesystem and in-memory object stores.

use docvault_storage_core::{
    BackendConfig, ConnectionParams, DownloadOptions, ErrorKind, StorageOperation,
    StorageOrchestrator, StorageSettings, StorageStrategy, UploadOptions,
};
use std::collections::HashMap;
use tempfile::TempDir;

use super::helpers::{payload, MB};

fn local_orchestrator(temp_dir: &TempDir) -> StorageOrchestrator {
    let vars: HashMap<&str, String> = HashMap::from([(
        "LOCAL_STORAGE_PATH",
        temp_dir.path().to_string_lossy().to_string(),
    )]);
    StorageSettings::from_lookup(|name| vars.get(name).cloned())
        .unwrap()
        .build_orchestrator(None)
        .unwrap()
}

fn memory_orchestrator() -> StorageOrchestrator {
    StorageOrchestrator::from_configs(vec![BackendConfig::new(
        "memory",
        1,
        ConnectionParams::Memory,
    )])
    .unwrap()
}

#[tokio::test]
async fn test_report_pdf_scenario_on_local_disk() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = local_orchestrator(&temp_dir);

    let file = payload("report.pdf", 3 * MB, "application/pdf");
    let path = orchestrator
        .upload(&file, &UploadOptions::default())
        .await
        .unwrap();
    assert!(path.contains("report.pdf"));
    assert!(path.starts_with("local://"));

    let data = orchestrator
        .download(&path, &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(data.len(), 3 * MB);
    assert_eq!(data, file.content);

    assert!(orchestrator.delete(&path).await.unwrap());
    assert!(!orchestrator.exists(&path).await.unwrap());
    assert!(!orchestrator.exists("never-created.pdf").await.unwrap());
}

#[tokio::test]
async fn test_checksum_verified_download() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = local_orchestrator(&temp_dir);

    let file = payload("contracts/lease.pdf", 4096, "application/pdf");
    let path = orchestrator
        .upload(&file, &UploadOptions::default().with_checksum())
        .await
        .unwrap();

    let data = orchestrator
        .download(&path, &DownloadOptions::verified())
        .await
        .unwrap();
    assert_eq!(data, file.content);

    std::fs::write(temp_dir.path().join("contracts/lease.pdf"), b"tampered").unwrap();
    let err = orchestrator
        .download(&path, &DownloadOptions::verified())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[tokio::test]
async fn test_metadata_listing_and_stats() {
    let orchestrator = memory_orchestrator();

    let options = UploadOptions::default().with_metadata("owner", "alice");
    for (name, size) in [("docs/a.txt", 10), ("docs/b.txt", 30), ("other/c.txt", 20)] {
        orchestrator
            .upload(&payload(name, size, "text/plain"), &options)
            .await
            .unwrap();
    }

    let docs = orchestrator.list_files(Some("docs")).await.unwrap();
    let mut names: Vec<_> = docs.iter().map(|f| f.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert!(docs.iter().all(|f| f.content.is_empty()));

    let info = orchestrator.get_file_info("docs/b.txt").await.unwrap();
    assert_eq!(info.size, 30);
    assert_eq!(info.mime_type, "text/plain");
    assert_eq!(info.metadata.get("owner").map(String::as_str), Some("alice"));

    let stats = orchestrator.get_storage_stats().await.unwrap();
    assert_eq!(stats.file_count, 3);
    assert_eq!(stats.used_bytes, 60);
    assert_eq!(stats.largest_file_size, 30);
}

#[tokio::test]
async fn test_copy_move_and_directories() {
    let orchestrator = memory_orchestrator();
    orchestrator
        .upload(&payload("inbox/a.txt", 12, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();

    assert!(orchestrator
        .copy_file("inbox/a.txt", "archive/a.txt")
        .await
        .unwrap());
    assert!(orchestrator.exists("inbox/a.txt").await.unwrap());

    assert!(orchestrator
        .move_file("archive/a.txt", "archive/2024/a.txt")
        .await
        .unwrap());
    assert!(!orchestrator.exists("archive/a.txt").await.unwrap());
    assert!(orchestrator.exists("archive/2024/a.txt").await.unwrap());

    assert!(orchestrator.create_directory("reports").await.unwrap());
    let err = orchestrator.create_directory("reports").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_download_url_unsupported_without_signer() {
    let orchestrator = memory_orchestrator();
    orchestrator
        .upload(&payload("a.txt", 3, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();

    let err = orchestrator
        .generate_download_url("a.txt", std::time::Duration::from_secs(60))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn test_every_call_recorded() {
    let orchestrator = memory_orchestrator();
    let path = orchestrator
        .upload(&payload("a.txt", 3, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();
    orchestrator
        .download(&path, &DownloadOptions::default())
        .await
        .unwrap();
    let _ = orchestrator.download("missing.txt", &DownloadOptions::default()).await;
    orchestrator.exists(&path).await.unwrap();

    assert_eq!(orchestrator.recorded_outcomes(StorageOperation::Upload).len(), 1);
    let downloads = orchestrator.recorded_outcomes(StorageOperation::Download);
    assert_eq!(downloads.len(), 2);
    assert!(downloads[0].success);
    assert_eq!(downloads[1].error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(orchestrator.recorded_outcomes(StorageOperation::Exists).len(), 1);
}
