//! Prometheus metrics registry for the storage layer.
//!
//! This module provides a metrics registry using the prometheus-client crate,
//! covering per-backend latency, operation outcomes, errors, retries,
//! fallbacks, circuit-breaker state and backend health.

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Instant;

use super::labels::{
    BackendLabels, OperationStatus, OutcomeLabels, StorageErrorLabels, StorageLabels,
    StorageOperation,
};
use crate::circuit_breaker::CircuitState;
use crate::error::ErrorKind;
use crate::health::HealthStatus;

/// Storage latency histogram buckets (in seconds).
/// Covers typical cloud storage latencies: 10ms to 10s.
const STORAGE_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Prometheus metrics registry for the storage layer.
pub struct PrometheusMetrics {
    /// Internal prometheus-client registry.
    registry: RwLock<Registry>,

    // ========================================
    // Operation Metrics
    // ========================================
    /// Operation latency histogram (by backend and operation).
    pub operation_latency_seconds: Family<StorageLabels, Histogram>,

    /// Operations by backend, operation and outcome.
    pub operations_total: Family<OutcomeLabels, Counter>,

    /// Cumulative bytes written to storage.
    pub write_bytes_total: Family<BackendLabels, Counter>,

    /// Cumulative bytes read from storage.
    pub read_bytes_total: Family<BackendLabels, Counter>,

    // ========================================
    // Resilience Metrics
    // ========================================
    /// Storage operation errors by kind.
    pub storage_errors_total: Family<StorageErrorLabels, Counter>,

    /// Retries by backend and operation.
    pub retries_total: Family<StorageLabels, Counter>,

    /// Fallbacks away from a failing backend.
    pub fallbacks_total: Family<StorageLabels, Counter>,

    /// Circuit state (0 = closed, 1 = open, 2 = half-open).
    pub circuit_state: Family<BackendLabels, Gauge>,

    /// Backend health (2 = healthy, 1 = degraded, 0 = unhealthy).
    pub backend_health: Family<BackendLabels, Gauge>,

    /// Start time of metrics collection.
    start_time: Instant,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    /// Create a new PrometheusMetrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let operation_latency_seconds =
            Family::<StorageLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(STORAGE_LATENCY_BUCKETS.iter().cloned())
            });
        let operations_total = Family::<OutcomeLabels, Counter>::default();
        let write_bytes_total = Family::<BackendLabels, Counter>::default();
        let read_bytes_total = Family::<BackendLabels, Counter>::default();

        let storage_errors_total = Family::<StorageErrorLabels, Counter>::default();
        let retries_total = Family::<StorageLabels, Counter>::default();
        let fallbacks_total = Family::<StorageLabels, Counter>::default();
        let circuit_state = Family::<BackendLabels, Gauge>::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();

        registry.register(
            "docvault_storage_operation_latency_seconds",
            "Storage operation latency",
            operation_latency_seconds.clone(),
        );
        registry.register(
            "docvault_storage_operations",
            "Storage operations by backend, operation and outcome",
            operations_total.clone(),
        );
        registry.register(
            "docvault_storage_write_bytes",
            "Cumulative bytes written to storage",
            write_bytes_total.clone(),
        );
        registry.register(
            "docvault_storage_read_bytes",
            "Cumulative bytes read from storage",
            read_bytes_total.clone(),
        );
        registry.register(
            "docvault_storage_errors",
            "Storage operation errors by kind",
            storage_errors_total.clone(),
        );
        registry.register(
            "docvault_storage_retries",
            "Retried storage attempts",
            retries_total.clone(),
        );
        registry.register(
            "docvault_storage_fallbacks",
            "Operations that fell back past a failing backend",
            fallbacks_total.clone(),
        );
        registry.register(
            "docvault_storage_circuit_state",
            "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            circuit_state.clone(),
        );
        registry.register(
            "docvault_storage_backend_health",
            "Backend health (2=healthy, 1=degraded, 0=unhealthy)",
            backend_health.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            operation_latency_seconds,
            operations_total,
            write_bytes_total,
            read_bytes_total,
            storage_errors_total,
            retries_total,
            fallbacks_total,
            circuit_state,
            backend_health,
            start_time: Instant::now(),
        }
    }

    // ========================================
    // Operation Methods
    // ========================================

    /// Record one completed operation.
    pub fn record_operation(
        &self,
        backend: &str,
        operation: StorageOperation,
        status: OperationStatus,
        latency_secs: f64,
    ) {
        self.operation_latency_seconds
            .get_or_create(&StorageLabels::new(backend, operation))
            .observe(latency_secs);
        self.operations_total
            .get_or_create(&OutcomeLabels::new(backend, operation, status))
            .inc();
    }

    /// Increment storage write bytes counter.
    pub fn inc_write_bytes(&self, backend: &str, bytes: u64) {
        self.write_bytes_total
            .get_or_create(&BackendLabels::new(backend))
            .inc_by(bytes);
    }

    /// Increment storage read bytes counter.
    pub fn inc_read_bytes(&self, backend: &str, bytes: u64) {
        self.read_bytes_total
            .get_or_create(&BackendLabels::new(backend))
            .inc_by(bytes);
    }

    // ========================================
    // Resilience Methods
    // ========================================

    /// Increment storage error counter.
    pub fn inc_storage_error(&self, backend: &str, kind: ErrorKind) {
        self.storage_errors_total
            .get_or_create(&StorageErrorLabels::new(backend, kind))
            .inc();
    }

    /// Record a retry.
    pub fn record_retry(&self, backend: &str, operation: StorageOperation) {
        self.retries_total
            .get_or_create(&StorageLabels::new(backend, operation))
            .inc();
    }

    /// Record a fallback away from `backend`.
    pub fn record_fallback(&self, backend: &str, operation: StorageOperation) {
        self.fallbacks_total
            .get_or_create(&StorageLabels::new(backend, operation))
            .inc();
    }

    pub fn set_circuit_state(&self, backend: &str, state: CircuitState) {
        self.circuit_state
            .get_or_create(&BackendLabels::new(backend))
            .set(state.as_gauge());
    }

    pub fn set_backend_health(&self, backend: &str, status: HealthStatus) {
        let value = match status {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        };
        self.backend_health
            .get_or_create(&BackendLabels::new(backend))
            .set(value);
    }

    // ========================================
    // Utility Methods
    // ========================================

    /// Get elapsed time since metrics collection started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            return String::new();
        }
        buffer
    }
}
