//! Fallback routing tests.
//!
//! Tests for priority routing across backends including:
//! - Falling back past a failing primary
//! - Fallback eligibility
//! - Aggregate failures
//! - Validation short-circuiting
//! - Skipping backends that fail health checks
//! - Checksum mismatches surfacing without fallback

use docvault_storage_core::storage::ObjectStoreStrategy;
use docvault_storage_core::{
    BackendKind, DownloadOptions, ErrorKind, OutcomeSink, StorageError, StorageOperation,
    StorageOrchestrator, StorageStrategy, UploadLimits, UploadOptions,
};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use std::borrow::Cow;
use std::sync::Arc;

use super::helpers::{backend_config, orchestrator_over, payload, ScriptedStrategy, MB};

#[tokio::test]
async fn test_upload_falls_back_to_secondary() {
    let primary = ScriptedStrategy::failing();
    let secondary = ScriptedStrategy::healthy();
    let (orchestrator, recorder) =
        orchestrator_over(&[("primary", primary.clone()), ("secondary", secondary.clone())]);

    let file = payload("report.pdf", 1024, "application/pdf");
    let routed = orchestrator
        .upload_routed(&file, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(routed.backend, "secondary");
    assert!(routed.value.ends_with("report.pdf"));
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);

    let uploads = recorder.outcomes(StorageOperation::Upload);
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].backend, "primary");
    assert_eq!(uploads[0].error_kind(), Some(ErrorKind::Transient));
    assert_eq!(uploads[1].backend, "secondary");
    assert!(uploads[1].success);

    let data = orchestrator
        .download_routed(&routed.value, &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(data.backend, "secondary");
    assert_eq!(data.value, file.content);
}

#[tokio::test]
async fn test_not_fallback_eligible_returns_primary_error() {
    let primary = ScriptedStrategy::failing();
    let secondary = ScriptedStrategy::healthy();
    let orchestrator = StorageOrchestrator::builder()
        .backend_with_strategy(
            backend_config("primary", 1).with_fallback(false),
            primary.clone(),
        )
        .backend_with_strategy(backend_config("secondary", 2), secondary.clone())
        .build()
        .unwrap();

    let err = orchestrator
        .upload(&payload("a.txt", 10, "text/plain"), &UploadOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.to_string().contains("503"));
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_all_backends_failing_aggregates() {
    let (orchestrator, _) = orchestrator_over(&[
        ("s3", ScriptedStrategy::failing()),
        ("azure", ScriptedStrategy::failing()),
        ("local", ScriptedStrategy::failing()),
    ]);

    let err = orchestrator
        .upload(&payload("a.txt", 10, "text/plain"), &UploadOptions::default())
        .await
        .unwrap_err();

    match &err {
        docvault_storage_core::Error::Storage(StorageError::AllBackendsFailed { failures }) => {
            let names: Vec<_> = failures.iter().map(|f| f.backend.as_str()).collect();
            assert_eq!(names, vec!["s3", "azure", "local"]);
        }
        other => panic!("expected aggregate failure, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("[s3]"));
    assert!(message.contains("[local]"));
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn test_validation_makes_no_adapter_calls() {
    let primary = ScriptedStrategy::healthy();
    let secondary = ScriptedStrategy::healthy();
    let limits = UploadLimits {
        max_file_size: MB as u64,
        ..Default::default()
    };
    let orchestrator = StorageOrchestrator::builder()
        .backend_with_strategy(
            backend_config("primary", 1).with_limits(limits.clone()),
            primary.clone(),
        )
        .backend_with_strategy(
            backend_config("secondary", 2).with_limits(limits),
            secondary.clone(),
        )
        .build()
        .unwrap();

    let err = orchestrator
        .upload(
            &payload("big.bin", 2 * MB, "application/octet-stream"),
            &UploadOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(primary.calls(), 0);
    assert_eq!(secondary.calls(), 0);
    assert!(orchestrator
        .recorded_outcomes(StorageOperation::Upload)
        .is_empty());
}

#[tokio::test]
async fn test_disallowed_mime_type_is_validation() {
    let primary = ScriptedStrategy::healthy();
    let orchestrator = StorageOrchestrator::builder()
        .backend_with_strategy(
            backend_config("primary", 1).with_limits(UploadLimits {
                allowed_mime_types: vec!["application/pdf".to_string()],
                ..Default::default()
            }),
            primary.clone(),
        )
        .build()
        .unwrap();

    let err = orchestrator
        .upload(&payload("run.sh", 10, "text/x-shellscript"), &UploadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn test_unhealthy_backend_skipped_without_breaker_penalty() {
    let primary = ScriptedStrategy::failing();
    let secondary = ScriptedStrategy::healthy();
    let (orchestrator, _) =
        orchestrator_over(&[("primary", primary.clone()), ("secondary", secondary.clone())]);

    let report = orchestrator.health_report().await;
    assert_eq!(report.backends[0].status, docvault_storage_core::HealthStatus::Unhealthy);
    assert!(!orchestrator.health_monitor().is_routable("primary"));

    let routed = orchestrator
        .upload_routed(&payload("a.txt", 10, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(routed.backend, "secondary");
    assert_eq!(primary.calls(), 0);

    let breaker = orchestrator.backend("primary").unwrap().breaker();
    assert_eq!(breaker.failure_count(), 0);

    // Recovery: a passing probe makes the primary routable again
    primary.set_failing(false);
    orchestrator.health_report().await;
    let routed = orchestrator
        .upload_routed(&payload("b.txt", 10, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(routed.backend, "primary");
}

#[tokio::test]
async fn test_not_found_cascades_to_owner() {
    let primary = ScriptedStrategy::healthy();
    let secondary = ScriptedStrategy::healthy();
    let (orchestrator, _) =
        orchestrator_over(&[("primary", primary.clone()), ("secondary", secondary.clone())]);

    let file = payload("only-on-secondary.txt", 10, "text/plain");
    secondary
        .upload(&file, &UploadOptions::default())
        .await
        .unwrap();

    let routed = orchestrator
        .download_routed("only-on-secondary.txt", &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(routed.backend, "secondary");
    assert!(orchestrator.exists("only-on-secondary.txt").await.unwrap());
    assert!(!orchestrator.exists("never-created.txt").await.unwrap());
}

#[tokio::test]
async fn test_success_rate_reported_in_health() {
    let primary = ScriptedStrategy::failing_times(1);
    let (orchestrator, _) = orchestrator_over(&[("primary", primary.clone())]);

    let _ = orchestrator.exists("a.txt").await;
    let _ = orchestrator.exists("a.txt").await;

    let report = orchestrator.health_report().await;
    assert_eq!(report.backends[0].backend, "primary");
    assert_eq!(report.backends[0].success_rate, 0.5);

    let sink: Arc<dyn OutcomeSink> = orchestrator.sink().clone();
    assert_eq!(sink.success_rate("primary"), Some(0.5));
}

#[tokio::test]
async fn test_checksum_mismatch_is_final() {
    let store = Arc::new(InMemory::new());
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::Metadata(Cow::Borrowed("sha256")),
        AttributeValue::from("deadbeef"),
    );
    store
        .put_opts(
            &Path::from("a.txt"),
            PutPayload::from_static(b"hello"),
            PutOptions {
                attributes,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let primary = ObjectStoreStrategy::new(
        BackendKind::Memory,
        None,
        store,
        None,
        UploadLimits::default(),
    );

    let secondary = ScriptedStrategy::healthy();
    secondary
        .upload(&payload("a.txt", 5, "text/plain"), &UploadOptions::default())
        .await
        .unwrap();
    let calls_before = secondary.calls();

    let orchestrator = StorageOrchestrator::builder()
        .backend_with_strategy(backend_config("primary", 1), Arc::new(primary))
        .backend_with_strategy(backend_config("secondary", 2), secondary.clone())
        .build()
        .unwrap();

    let err = orchestrator
        .download("a.txt", &DownloadOptions::verified())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(matches!(
        err,
        docvault_storage_core::Error::Storage(StorageError::Integrity(_))
    ));
    assert_eq!(secondary.calls(), calls_before);
    assert_eq!(
        orchestrator.backend("primary").unwrap().breaker().failure_count(),
        0
    );
}
