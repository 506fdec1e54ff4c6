//! Test helper utilities.
//!
//! Provides a scripted storage backend with call counters, payload builders
//! and orchestrator setups used across the suite.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docvault_storage_core::storage::ObjectStoreStrategy;
use docvault_storage_core::{
    BackendConfig, BackendKind, CircuitBreakerConfig, ConnectionParams, DownloadOptions, Error,
    FileInfo, HealthCheckPolicy, OutcomeRecorder, Result, RetryPolicy, StorageHealth,
    StorageOrchestrator, StorageStats, StorageStrategy, UploadLimits, UploadOptions,
};

pub const MB: usize = 1024 * 1024;

/// Failures left before the scripted backend recovers. `u32::MAX` never recovers.
const FOREVER: u32 = u32::MAX;

/// A backend whose failures are scripted by the test.
///
/// Successful calls are served by an in-memory store. Every contract call
/// except `get_health` counts towards [`calls`](Self::calls).
pub struct ScriptedStrategy {
    inner: ObjectStoreStrategy,
    calls: AtomicU32,
    health_calls: AtomicU32,
    failures_left: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedStrategy {
    fn with_failures(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectStoreStrategy::in_memory(UploadLimits::default()),
            calls: AtomicU32::new(0),
            health_calls: AtomicU32::new(0),
            failures_left: AtomicU32::new(failures),
            delay: Mutex::new(None),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::with_failures(0)
    }

    /// Every call fails with a transient backend error.
    pub fn failing() -> Arc<Self> {
        Self::with_failures(FOREVER)
    }

    /// The first `n` calls fail, then the backend recovers.
    pub fn failing_times(n: u32) -> Arc<Self> {
        Self::with_failures(n)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        let value = if failing { FOREVER } else { 0 };
        self.failures_left.store(value, Ordering::SeqCst);
    }

    /// Delay every call before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    fn is_failing(&self) -> bool {
        self.failures_left.load(Ordering::SeqCst) > 0
    }

    async fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        if left != FOREVER {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
        }
        Err(Error::backend("503 Service Unavailable"))
    }
}

#[async_trait]
impl StorageStrategy for ScriptedStrategy {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String> {
        self.gate().await?;
        self.inner.upload(file, options).await
    }

    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes> {
        self.gate().await?;
        self.inner.download(path, options).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.gate().await?;
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.gate().await?;
        self.inner.exists(path).await
    }

    async fn get_health(&self) -> Result<StorageHealth> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_failing() {
            return Err(Error::backend("health probe refused"));
        }
        self.inner.get_health().await
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        self.gate().await?;
        self.inner.list_files(prefix).await
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.gate().await?;
        self.inner.copy_file(src, dst).await
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.gate().await?;
        self.inner.move_file(src, dst).await
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.gate().await?;
        self.inner.get_file_info(path).await
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        self.gate().await?;
        self.inner.get_storage_stats().await
    }

    async fn create_directory(&self, path: &str) -> Result<bool> {
        self.gate().await?;
        self.inner.create_directory(path).await
    }

    async fn generate_download_url(&self, path: &str, expiry: Duration) -> Result<String> {
        self.gate().await?;
        self.inner.generate_download_url(path, expiry).await
    }
}

/// Backend configuration with retries off and a fast breaker.
pub fn backend_config(id: &str, priority: u32) -> BackendConfig {
    BackendConfig::new(id, priority, ConnectionParams::Memory)
        .with_retry(RetryPolicy::disabled())
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            ..Default::default()
        })
        .with_health_check(HealthCheckPolicy {
            failure_threshold: 1,
            ..Default::default()
        })
}

/// Orchestrator over scripted backends, in priority order.
pub fn orchestrator_over(
    backends: &[(&str, Arc<ScriptedStrategy>)],
) -> (StorageOrchestrator, Arc<OutcomeRecorder>) {
    let recorder = Arc::new(OutcomeRecorder::default());
    let builder = backends.iter().enumerate().fold(
        StorageOrchestrator::builder().sink(recorder.clone()),
        |builder, (index, (id, strategy))| {
            let strategy: Arc<dyn StorageStrategy> = strategy.clone();
            builder.backend_with_strategy(backend_config(id, index as u32 + 1), strategy)
        },
    );
    let orchestrator = builder.build().expect("orchestrator builds");
    (orchestrator, recorder)
}

/// Deterministic payload of `size` bytes.
pub fn payload(name: &str, size: usize, mime_type: &str) -> FileInfo {
    let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    FileInfo::new(name, content, mime_type)
}
