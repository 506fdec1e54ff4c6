//! Circuit breaker routing tests.
//!
//! Tests for breaker behaviour as seen through the orchestrator:
//! - Opening after consecutive transient failures
//! - Rejection without an adapter call
//! - A single half-open probe after the cooldown
//! - Fallback while a circuit is open

use docvault_storage_core::{
    CircuitState, Error, ErrorKind, StorageError, StorageStrategy, UploadOptions,
};
use std::time::Duration;

use super::helpers::{orchestrator_over, payload, ScriptedStrategy};

const COOLDOWN: Duration = Duration::from_secs(30);

async fn upload(
    orchestrator: &docvault_storage_core::StorageOrchestrator,
    name: &str,
) -> docvault_storage_core::Result<String> {
    orchestrator
        .upload(&payload(name, 16, "text/plain"), &UploadOptions::default())
        .await
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_threshold_and_rejects_without_call() {
    let backend = ScriptedStrategy::failing();
    let (orchestrator, _) = orchestrator_over(&[("s3", backend.clone())]);

    for i in 0..3 {
        let err = upload(&orchestrator, &format!("f{}.txt", i)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
    assert_eq!(backend.calls(), 3);
    assert_eq!(
        orchestrator.circuit_states(),
        vec![("s3".to_string(), CircuitState::Open)]
    );

    let err = upload(&orchestrator, "rejected.txt").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::CircuitOpen { ref backend }) if backend == "s3"
    ));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_closes_on_success() {
    let backend = ScriptedStrategy::failing();
    let (orchestrator, _) = orchestrator_over(&[("s3", backend.clone())]);

    for i in 0..3 {
        let _ = upload(&orchestrator, &format!("f{}.txt", i)).await;
    }
    tokio::time::advance(COOLDOWN).await;
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::HalfOpen);

    backend.set_failing(false);
    upload(&orchestrator, "probe.txt").await.unwrap();

    assert_eq!(backend.calls(), 4);
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_failure_reopens() {
    let backend = ScriptedStrategy::failing();
    let (orchestrator, _) = orchestrator_over(&[("s3", backend.clone())]);

    for i in 0..3 {
        let _ = upload(&orchestrator, &format!("f{}.txt", i)).await;
    }
    tokio::time::advance(COOLDOWN).await;

    let err = upload(&orchestrator, "probe.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(backend.calls(), 4);
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::Open);

    // The cooldown restarts from the failed probe
    let err = upload(&orchestrator, "again.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(backend.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_probe() {
    let backend = ScriptedStrategy::failing();
    let (orchestrator, _) = orchestrator_over(&[("s3", backend.clone())]);

    for i in 0..3 {
        let _ = upload(&orchestrator, &format!("f{}.txt", i)).await;
    }
    tokio::time::advance(COOLDOWN).await;

    backend.set_failing(false);
    backend.set_delay(Some(Duration::from_secs(1)));

    let (probe, concurrent) = tokio::join!(
        upload(&orchestrator, "probe.txt"),
        upload(&orchestrator, "concurrent.txt")
    );

    assert!(probe.is_ok());
    assert_eq!(concurrent.unwrap_err().kind(), ErrorKind::CircuitOpen);
    assert_eq!(backend.calls(), 4);
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_falls_back_to_next_backend() {
    let primary = ScriptedStrategy::failing();
    let secondary = ScriptedStrategy::healthy();
    let (orchestrator, _) =
        orchestrator_over(&[("s3", primary.clone()), ("local", secondary.clone())]);

    for i in 0..3 {
        upload(&orchestrator, &format!("f{}.txt", i)).await.unwrap();
    }
    assert_eq!(primary.calls(), 3);
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::Open);

    upload(&orchestrator, "after-open.txt").await.unwrap();
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_errors_do_not_open_circuit() {
    let backend = ScriptedStrategy::healthy();
    let (orchestrator, _) = orchestrator_over(&[("s3", backend.clone())]);

    for _ in 0..5 {
        let err = orchestrator.delete("missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(orchestrator.circuit_states()[0].1, CircuitState::Closed);
    assert_eq!(backend.calls(), 5);
}
