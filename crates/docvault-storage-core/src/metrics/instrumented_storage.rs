//! Instrumented storage strategy decorator.
//!
//! Wraps any `StorageStrategy` so that every call, on every backend, produces
//! exactly one operation outcome and the matching Prometheus samples. Adapters
//! stay free of bookkeeping.

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::labels::{OperationStatus, StorageOperation};
use super::registry::PrometheusMetrics;
use super::{OperationOutcome, OutcomeDetail, OutcomeSink};
use crate::health::{HealthStatus, StorageHealth};
use crate::storage::{
    BackendKind, DownloadOptions, FileInfo, StorageStats, StorageStrategy, UploadOptions,
};
use crate::Result;

/// A storage strategy wrapper that records outcomes and metrics for all operations.
///
/// # Example
///
/// ```rust,ignore
/// use docvault_storage_core::metrics::{InstrumentedStrategy, OutcomeRecorder};
/// use docvault_storage_core::storage::{ObjectStoreStrategy, UploadLimits};
///
/// let inner = Arc::new(ObjectStoreStrategy::in_memory(UploadLimits::default()));
/// let sink = Arc::new(OutcomeRecorder::default());
/// let instrumented = InstrumentedStrategy::new(inner, "memory", sink, None);
/// ```
pub struct InstrumentedStrategy {
    /// The wrapped strategy.
    inner: Arc<dyn StorageStrategy>,

    /// Backend identifier for outcome records and metric labels.
    backend_id: String,

    sink: Arc<dyn OutcomeSink>,

    metrics: Option<Arc<PrometheusMetrics>>,
}

impl InstrumentedStrategy {
    pub fn new(
        inner: Arc<dyn StorageStrategy>,
        backend_id: impl Into<String>,
        sink: Arc<dyn OutcomeSink>,
        metrics: Option<Arc<PrometheusMetrics>>,
    ) -> Self {
        Self {
            inner,
            backend_id: backend_id.into(),
            sink,
            metrics,
        }
    }

    /// Get the backend identifier.
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Get the wrapped strategy.
    pub fn inner(&self) -> &Arc<dyn StorageStrategy> {
        &self.inner
    }

    /// Run one call and record its outcome.
    async fn observe<T, Fut>(
        &self,
        operation: StorageOperation,
        call: Fut,
        describe: impl FnOnce(&T) -> OutcomeDetail,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(value) => {
                let mut outcome =
                    OperationOutcome::success(operation, &self.backend_id, elapsed, describe(value));
                // A health report that answered Unhealthy is a failed check
                if outcome.detail == (OutcomeDetail::Health { status: HealthStatus::Unhealthy }) {
                    outcome.success = false;
                }
                outcome
            }
            Err(e) => OperationOutcome::failure(operation, &self.backend_id, elapsed, e),
        };
        self.record_metrics(&outcome);
        self.sink.record(outcome);

        result
    }

    fn record_metrics(&self, outcome: &OperationOutcome) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        let status = if outcome.success {
            OperationStatus::Success
        } else {
            OperationStatus::Failure
        };
        metrics.record_operation(
            &self.backend_id,
            outcome.operation,
            status,
            outcome.duration.as_secs_f64(),
        );

        match &outcome.detail {
            OutcomeDetail::Uploaded { bytes, .. } => {
                metrics.inc_write_bytes(&self.backend_id, *bytes);
            }
            OutcomeDetail::Downloaded { bytes } => {
                metrics.inc_read_bytes(&self.backend_id, *bytes);
            }
            OutcomeDetail::Health { status } => {
                metrics.set_backend_health(&self.backend_id, *status);
            }
            OutcomeDetail::Failed { kind, .. } => {
                metrics.inc_storage_error(&self.backend_id, *kind);
            }
            _ => {}
        }
    }
}

fn flag(value: &bool) -> OutcomeDetail {
    OutcomeDetail::Flag { value: *value }
}

#[async_trait]
impl StorageStrategy for InstrumentedStrategy {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String> {
        let bytes = file.size;
        self.observe(
            StorageOperation::Upload,
            self.inner.upload(file, options),
            |locator| OutcomeDetail::Uploaded {
                locator: locator.clone(),
                bytes,
            },
        )
        .await
    }

    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes> {
        self.observe(
            StorageOperation::Download,
            self.inner.download(path, options),
            |data| OutcomeDetail::Downloaded {
                bytes: data.len() as u64,
            },
        )
        .await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.observe(StorageOperation::Delete, self.inner.delete(path), flag)
            .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.observe(StorageOperation::Exists, self.inner.exists(path), flag)
            .await
    }

    async fn get_health(&self) -> Result<StorageHealth> {
        let mut health = self
            .observe(
                StorageOperation::Health,
                self.inner.get_health(),
                |h: &StorageHealth| OutcomeDetail::Health { status: h.status },
            )
            .await?;
        health.backend = self.backend_id.clone();
        health.success_rate = self.sink.success_rate(&self.backend_id).unwrap_or(1.0);
        Ok(health)
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        self.observe(
            StorageOperation::List,
            self.inner.list_files(prefix),
            |files| OutcomeDetail::Listed { count: files.len() },
        )
        .await
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.observe(StorageOperation::Copy, self.inner.copy_file(src, dst), flag)
            .await
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.observe(StorageOperation::Move, self.inner.move_file(src, dst), flag)
            .await
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.observe(
            StorageOperation::FileInfo,
            self.inner.get_file_info(path),
            |info| OutcomeDetail::Described {
                path: info.path.clone(),
                size: info.size,
            },
        )
        .await
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        self.observe(
            StorageOperation::Stats,
            self.inner.get_storage_stats(),
            |stats| OutcomeDetail::Stats {
                file_count: stats.file_count,
                used_bytes: stats.used_bytes,
            },
        )
        .await
    }

    async fn create_directory(&self, path: &str) -> Result<bool> {
        self.observe(
            StorageOperation::CreateDirectory,
            self.inner.create_directory(path),
            flag,
        )
        .await
    }

    async fn generate_download_url(&self, path: &str, expiry: Duration) -> Result<String> {
        self.observe(
            StorageOperation::DownloadUrl,
            self.inner.generate_download_url(path, expiry),
            |_| OutcomeDetail::Url,
        )
        .await
    }
}
