//! Configuration loader tests.
//!
//! Environment and YAML settings resolved all the way to an orchestrator.
//! Client construction is offline; no request reaches MinIO or Azurite.

use docvault_storage_core::{
    BackendKind, ErrorKind, StorageProvider, StorageSettings, StorageStrategy,
};
use std::collections::HashMap;
use tempfile::TempDir;

fn from_vars(vars: &[(&str, &str)]) -> docvault_storage_core::Result<StorageSettings> {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StorageSettings::from_lookup(|name| env.get(name).cloned())
}

#[test]
fn test_emulator_stack_builds_in_priority_order() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_string_lossy().to_string();
    let settings = from_vars(&[
        ("STORAGE_USE_EMULATOR", "true"),
        ("AWS_S3_BUCKET", "documents"),
        ("AZURE_STORAGE_CONTAINER_NAME", "documents"),
        ("LOCAL_STORAGE_PATH", root.as_str()),
        ("STORAGE_PROVIDER", "azure"),
    ])
    .unwrap();

    let orchestrator = settings.build_orchestrator(None).unwrap();
    assert_eq!(orchestrator.backend_ids(), vec!["azure", "s3", "local"]);
    assert_eq!(orchestrator.kind(), BackendKind::Azure);

    let local = orchestrator.backend("local").unwrap();
    assert_eq!(local.config().priority, 3);
    assert!(local.config().fallback_eligible);
}

#[test]
fn test_empty_values_count_as_unset() {
    let settings = from_vars(&[
        ("STORAGE_PROVIDER", ""),
        ("AWS_S3_BUCKET", "  "),
        ("STORAGE_RETRY_ATTEMPTS", ""),
    ])
    .unwrap();
    assert_eq!(settings.provider, StorageProvider::Auto);
    assert!(settings.s3.bucket.is_none());
    assert_eq!(settings.retry.attempts, 3);
}

#[test]
fn test_fail_fast_on_unconfigured_primary() {
    let err = from_vars(&[("STORAGE_PROVIDER", "s3")])
        .unwrap()
        .build_orchestrator(None)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_yaml_and_env_agree() {
    let yaml = StorageSettings::from_yaml_str(
        r#"
provider: local
fallback_enabled: false
circuit_breaker:
  threshold: 2
  timeout_ms: 1000
local:
  max_size: 1048576
"#,
    )
    .unwrap();
    let env = from_vars(&[
        ("STORAGE_PROVIDER", "local"),
        ("STORAGE_FALLBACK_ENABLED", "false"),
        ("STORAGE_CIRCUIT_BREAKER_THRESHOLD", "2"),
        ("STORAGE_CIRCUIT_BREAKER_TIMEOUT_MS", "1000"),
        ("LOCAL_STORAGE_MAX_SIZE", "1048576"),
    ])
    .unwrap();
    assert_eq!(yaml, env);
}

#[test]
fn test_yaml_rejects_zero_values() {
    let err = StorageSettings::from_yaml_str("timeout_ms: 0\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = StorageSettings::from_yaml_str("provider: gcs\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
