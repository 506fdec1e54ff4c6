//! Fallback orchestration across storage backends.
//!
//! The orchestrator keeps the enabled backends in priority order. Each call
//! goes to the first backend whose circuit is closed (or probing) and whose
//! health checks are passing, through that backend's circuit breaker and
//! retry executor. A failure on a fallback-eligible backend moves on to the
//! next candidate; when every candidate fails the caller gets one aggregate
//! error naming each backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::{BackendFailure, ErrorKind, StorageError};
use crate::health::{HealthMonitor, HealthReport, HealthStatus, StorageHealth};
use crate::metrics::{
    InstrumentedStrategy, OperationOutcome, OutcomeRecorder, OutcomeSink, PrometheusMetrics,
    StorageOperation,
};
use crate::retry::RetryExecutor;
use crate::storage::{
    create_strategy, BackendConfig, BackendKind, DownloadOptions, FileInfo, StorageStats,
    StorageStrategy, UploadOptions,
};
use crate::{Error, Result};

/// A value together with the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    /// Identifier of the backend that served the call
    pub backend: String,
    pub value: T,
}

/// One routable backend: adapter, breaker and retry policy.
pub struct BackendSlot {
    config: BackendConfig,
    strategy: InstrumentedStrategy,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
}

impl BackendSlot {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The instrumented adapter for this backend.
    pub fn strategy(&self) -> &InstrumentedStrategy {
        &self.strategy
    }

    /// Probe the backend outside the breaker and record the result.
    async fn probe(
        &self,
        monitor: &HealthMonitor,
        metrics: Option<&PrometheusMetrics>,
    ) -> StorageHealth {
        let policy = &self.config.health_check;
        let health = match tokio::time::timeout(policy.timeout, self.strategy.get_health()).await
        {
            Ok(Ok(health)) => health.apply_policy(policy),
            Ok(Err(e)) => StorageHealth::unhealthy(self.id(), self.config.kind(), e.to_string()),
            Err(_) => StorageHealth::unhealthy(
                self.id(),
                self.config.kind(),
                format!("Health probe timed out after {:?}", policy.timeout),
            ),
        };

        if let Some(metrics) = metrics {
            metrics.set_backend_health(self.id(), health.status);
        }
        monitor.record(health.clone());
        health
    }
}

/// Builder for [`StorageOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    backends: Vec<(BackendConfig, Option<Arc<dyn StorageStrategy>>)>,
    sink: Option<Arc<dyn OutcomeSink>>,
    metrics: Option<Arc<PrometheusMetrics>>,
}

impl OrchestratorBuilder {
    /// Add a backend whose adapter is built from its connection parameters.
    pub fn backend(mut self, config: BackendConfig) -> Self {
        self.backends.push((config, None));
        self
    }

    /// Add a backend with a caller-supplied adapter.
    pub fn backend_with_strategy(
        mut self,
        config: BackendConfig,
        strategy: Arc<dyn StorageStrategy>,
    ) -> Self {
        self.backends.push((config, Some(strategy)));
        self
    }

    /// Outcome sink shared by every backend (defaults to an [`OutcomeRecorder`]).
    pub fn sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the orchestrator. Disabled backends are dropped; the rest are
    /// ordered by priority (ties keep insertion order).
    pub fn build(self) -> Result<StorageOrchestrator> {
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(OutcomeRecorder::default()));
        let metrics = self.metrics;

        let mut backends: Vec<_> = self
            .backends
            .into_iter()
            .filter(|(config, _)| {
                if !config.enabled {
                    debug!("Backend {} is disabled, skipping", config.id);
                }
                config.enabled
            })
            .collect();
        backends.sort_by_key(|(config, _)| config.priority);

        if backends.is_empty() {
            return Err(Error::Config(
                "No enabled storage backends configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (config, _) in &backends {
            if !seen.insert(config.id.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate storage backend id: {}",
                    config.id
                )));
            }
        }

        let health = Arc::new(HealthMonitor::new());
        let mut slots = Vec::with_capacity(backends.len());

        for (config, strategy) in backends {
            let inner = match strategy {
                Some(strategy) => strategy,
                None => create_strategy(&config)?,
            };
            let strategy =
                InstrumentedStrategy::new(inner, config.id.clone(), sink.clone(), metrics.clone());
            let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
            let mut retry = RetryExecutor::new(config.id.clone(), config.retry.clone());
            if let Some(metrics) = &metrics {
                retry = retry.with_metrics(Arc::clone(metrics));
                metrics.set_circuit_state(&config.id, CircuitState::Closed);
            }
            health.register(&config.id, config.health_check.failure_threshold);

            slots.push(Arc::new(BackendSlot {
                config,
                strategy,
                breaker,
                retry,
            }));
        }

        info!(
            "Storage orchestrator ready with backends: {}",
            slots
                .iter()
                .map(|s| format!("{}(priority {})", s.id(), s.config.priority))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(StorageOrchestrator {
            slots,
            sink,
            metrics,
            health,
            shutdown_tx,
        })
    }
}

/// Routes storage calls across prioritized backends with fallback.
pub struct StorageOrchestrator {
    slots: Vec<Arc<BackendSlot>>,
    sink: Arc<dyn OutcomeSink>,
    metrics: Option<Arc<PrometheusMetrics>>,
    health: Arc<HealthMonitor>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StorageOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build from resolved backend configurations with a default recorder.
    pub fn from_configs(configs: Vec<BackendConfig>) -> Result<Self> {
        configs
            .into_iter()
            .fold(Self::builder(), OrchestratorBuilder::backend)
            .build()
    }

    /// Backend identifiers in routing order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn backend(&self, id: &str) -> Option<&BackendSlot> {
        self.slots.iter().find(|s| s.id() == id).map(AsRef::as_ref)
    }

    /// Current breaker state per backend, in routing order.
    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.slots
            .iter()
            .map(|s| (s.id().to_string(), s.breaker.state()))
            .collect()
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn sink(&self) -> &Arc<dyn OutcomeSink> {
        &self.sink
    }

    pub fn metrics(&self) -> Option<&Arc<PrometheusMetrics>> {
        self.metrics.as_ref()
    }

    /// Recorded outcomes for an operation across all backends, oldest first.
    pub fn recorded_outcomes(&self, operation: StorageOperation) -> Vec<OperationOutcome> {
        self.sink.outcomes(operation)
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal background health checks to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Upload and report which backend stored the payload.
    ///
    /// The payload is validated against each candidate's limits before its
    /// adapter is called; a validation failure is returned immediately.
    pub async fn upload_routed(
        &self,
        file: &FileInfo,
        options: &UploadOptions,
    ) -> Result<Routed<String>> {
        self.route(StorageOperation::Upload, |slot| async move {
            slot.config.limits.validate(file)?;
            slot.strategy.upload(file, options).await
        })
        .await
    }

    /// Download and report which backend served the payload.
    pub async fn download_routed(
        &self,
        path: &str,
        options: &DownloadOptions,
    ) -> Result<Routed<Bytes>> {
        self.route(StorageOperation::Download, |slot| {
            slot.strategy.download(path, options)
        })
        .await
    }

    /// Probe every backend concurrently and record the results.
    pub async fn health_report(&self) -> HealthReport {
        let probes = self
            .slots
            .iter()
            .map(|slot| slot.probe(&self.health, self.metrics.as_deref()));
        HealthReport::from_backends(join_all(probes).await)
    }

    /// Spawn one periodic health-check task per backend.
    ///
    /// Tasks stop on [`shutdown`](Self::shutdown) or when the orchestrator is
    /// dropped. Probes bypass the circuit breakers.
    pub fn spawn_health_checks(&self) -> Vec<JoinHandle<()>> {
        self.slots
            .iter()
            .map(|slot| {
                let slot = Arc::clone(slot);
                let monitor = Arc::clone(&self.health);
                let metrics = self.metrics.clone();
                let mut shutdown_rx = self.shutdown_receiver();

                tokio::spawn(async move {
                    let period = slot.config.health_check.interval.max(Duration::from_millis(1));
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    debug!("Health checks for {} every {:?}", slot.id(), period);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                slot.probe(&monitor, metrics.as_deref()).await;
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("Stopping health checks for {}", slot.id());
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    fn publish_circuit_state(&self, slot: &BackendSlot) {
        if let Some(metrics) = &self.metrics {
            metrics.set_circuit_state(slot.id(), slot.breaker.state());
        }
    }

    /// Run `call` against backends in priority order until one succeeds.
    async fn route<'a, T, F, Fut>(&'a self, operation: StorageOperation, call: F) -> Result<Routed<T>>
    where
        F: Fn(&'a BackendSlot) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures: Vec<BackendFailure> = Vec::new();
        let mut last_error = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let slot: &'a BackendSlot = slot;
            let has_next = index + 1 < self.slots.len();

            if !self.health.is_routable(slot.id()) {
                debug!(
                    "Skipping {} for {}: failing health checks",
                    slot.id(),
                    operation
                );
                failures.push(BackendFailure {
                    backend: slot.id().to_string(),
                    kind: ErrorKind::CircuitOpen,
                    message: "skipped: failing health checks".to_string(),
                });
                continue;
            }

            let result = slot
                .breaker
                .call(slot.retry.execute(operation, || call(slot)))
                .await;
            self.publish_circuit_state(slot);

            let error = match result {
                Ok(value) => {
                    if !failures.is_empty() {
                        info!(
                            "{} served by fallback backend {} after {} failure(s)",
                            operation,
                            slot.id(),
                            failures.len()
                        );
                    }
                    return Ok(Routed {
                        backend: slot.id().to_string(),
                        value,
                    });
                }
                // Bad input and corrupted content are final on the first backend
                Err(e) if matches!(e.kind(), ErrorKind::Validation | ErrorKind::Integrity) => {
                    return Err(e)
                }
                Err(e) => e,
            };

            let kind = error.kind();
            failures.push(BackendFailure {
                backend: slot.id().to_string(),
                kind,
                message: error.to_string(),
            });

            if kind != ErrorKind::CircuitOpen && !slot.config.fallback_eligible {
                debug!(
                    "{} failed on {} which is not fallback-eligible: {}",
                    operation,
                    slot.id(),
                    error
                );
                return Err(error);
            }

            if has_next {
                warn!(
                    "{} failed on {} ({}), falling back to next backend",
                    operation,
                    slot.id(),
                    kind
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback(slot.id(), operation);
                }
            }
            last_error = Some(error);
        }

        if let (1, Some(error)) = (failures.len(), last_error) {
            return Err(error);
        }

        let error = Error::Storage(StorageError::AllBackendsFailed { failures });
        if error.kind() == ErrorKind::NotFound {
            debug!("{}: {}", operation, error);
        } else {
            error!("{}: {}", operation, error);
        }
        Err(error)
    }
}

#[async_trait]
impl StorageStrategy for StorageOrchestrator {
    /// Kind of the highest-priority backend.
    fn kind(&self) -> BackendKind {
        self.slots
            .first()
            .map(|s| s.config.kind())
            .unwrap_or(BackendKind::Memory)
    }

    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String> {
        Ok(self.upload_routed(file, options).await?.value)
    }

    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes> {
        Ok(self.download_routed(path, options).await?.value)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.route(StorageOperation::Delete, |slot| slot.strategy.delete(path))
            .await
            .map(|r| r.value)
    }

    /// False only when no reachable backend holds the path.
    async fn exists(&self, path: &str) -> Result<bool> {
        for slot in &self.slots {
            if !self.health.is_routable(slot.id()) {
                continue;
            }
            let result = slot
                .breaker
                .call(
                    slot.retry
                        .execute(StorageOperation::Exists, || slot.strategy.exists(path)),
                )
                .await;
            self.publish_circuit_state(slot);

            match result {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.kind() == ErrorKind::Validation => return Err(e),
                Err(e) => debug!("exists on {} failed: {}", slot.id(), e),
            }
        }
        Ok(false)
    }

    /// Aggregate health across every backend.
    async fn get_health(&self) -> Result<StorageHealth> {
        let report = self.health_report().await;

        let response_time_ms = report
            .backends
            .iter()
            .map(|h| h.response_time_ms)
            .max()
            .unwrap_or(0);
        let success_rate = if report.backends.is_empty() {
            1.0
        } else {
            report.backends.iter().map(|h| h.success_rate).sum::<f64>()
                / report.backends.len() as f64
        };
        let failing: Vec<String> = report
            .backends
            .iter()
            .filter(|h| h.status != HealthStatus::Healthy)
            .map(|h| format!("{}: {}", h.backend, h.message.as_deref().unwrap_or("degraded")))
            .collect();
        let details: HashMap<String, String> = report
            .backends
            .iter()
            .map(|h| (h.backend.clone(), format!("{:?}", h.status).to_lowercase()))
            .collect();

        Ok(StorageHealth {
            backend: "orchestrator".to_string(),
            kind: self.kind(),
            status: report.status,
            response_time_ms,
            success_rate,
            last_checked: chrono::Utc::now(),
            message: (!failing.is_empty()).then(|| failing.join("; ")),
            details,
        })
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        self.route(StorageOperation::List, |slot| slot.strategy.list_files(prefix))
            .await
            .map(|r| r.value)
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.route(StorageOperation::Copy, |slot| slot.strategy.copy_file(src, dst))
            .await
            .map(|r| r.value)
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.route(StorageOperation::Move, |slot| slot.strategy.move_file(src, dst))
            .await
            .map(|r| r.value)
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.route(StorageOperation::FileInfo, |slot| {
            slot.strategy.get_file_info(path)
        })
        .await
        .map(|r| r.value)
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        self.route(StorageOperation::Stats, |slot| {
            slot.strategy.get_storage_stats()
        })
        .await
        .map(|r| r.value)
    }

    async fn create_directory(&self, path: &str) -> Result<bool> {
        self.route(StorageOperation::CreateDirectory, |slot| {
            slot.strategy.create_directory(path)
        })
        .await
        .map(|r| r.value)
    }

    async fn generate_download_url(&self, path: &str, expiry: Duration) -> Result<String> {
        self.route(StorageOperation::DownloadUrl, |slot| {
            slot.strategy.generate_download_url(path, expiry)
        })
        .await
        .map(|r| r.value)
    }
}
