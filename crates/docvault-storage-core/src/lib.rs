//! Docvault Storage Core Library
//!
//! This crate provides the storage resilience layer for document payloads:
//! S3, Azure Blob and local-disk adapters behind one [`StorageStrategy`]
//! contract, with retry, circuit breaking, priority fallback, health probing
//! and per-operation outcome recording on top.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod storage;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{StorageProvider, StorageSettings};
pub use error::{BackendFailure, Error, ErrorKind, Result, StorageError};
pub use health::{HealthCheckPolicy, HealthMonitor, HealthReport, HealthStatus, StorageHealth};
pub use metrics::{
    InstrumentedStrategy, NullSink, OperationOutcome, OutcomeDetail, OutcomeRecorder,
    OutcomeSink, PrometheusMetrics, StorageOperation,
};
pub use orchestrator::{OrchestratorBuilder, Routed, StorageOrchestrator};
pub use retry::{RetryExecutor, RetryPolicy};
pub use storage::{
    create_strategy, BackendConfig, BackendKind, ConnectionParams, DownloadOptions, FileInfo,
    StorageStats, StorageStrategy, UploadLimits, UploadOptions,
};
