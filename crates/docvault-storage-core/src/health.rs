//! Backend health probing and monitoring.
//!
//! Health is never persisted: every probe is a fresh synthetic
//! upload → download → delete cycle against a uniquely named key. The
//! [`HealthMonitor`] keeps the latest result per backend so the orchestrator
//! can skip backends that keep failing their probes.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::storage::BackendKind;
use crate::Result;

/// Probes slower than this are reported as degraded by the adapters.
pub const DEFAULT_DEGRADED_LATENCY: Duration = Duration::from_secs(2);

/// Health status levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probe succeeded within the latency budget
    #[default]
    Healthy,
    /// Probe succeeded but slowly
    Degraded,
    /// Probe failed
    Unhealthy,
}

/// Health-check schedule and thresholds for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckPolicy {
    /// Time between background probes
    pub interval: Duration,
    /// Upper bound for a single probe
    pub timeout: Duration,
    /// Consecutive failed probes before routing skips the backend
    pub failure_threshold: u32,
    /// Probes slower than this are degraded
    pub degraded_latency: Duration,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
            degraded_latency: DEFAULT_DEGRADED_LATENCY,
        }
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    /// Backend identifier
    pub backend: String,
    pub kind: BackendKind,
    pub status: HealthStatus,
    /// Duration of the probe
    pub response_time_ms: u64,
    /// Rolling success ratio of recorded operations (1.0 when nothing recorded)
    pub success_rate: f64,
    pub last_checked: DateTime<Utc>,
    /// Failure or degradation detail
    pub message: Option<String>,
    /// Backend-specific details (bucket, container, endpoint, root)
    pub details: HashMap<String, String>,
}

impl StorageHealth {
    /// Unhealthy record without a probe (e.g. probe timed out).
    pub fn unhealthy(backend: &str, kind: BackendKind, message: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            kind,
            status: HealthStatus::Unhealthy,
            response_time_ms: 0,
            success_rate: 1.0,
            last_checked: Utc::now(),
            message: Some(message.into()),
            details: HashMap::new(),
        }
    }

    /// Re-grade a healthy result against a policy's latency budget.
    pub fn apply_policy(mut self, policy: &HealthCheckPolicy) -> Self {
        let slow = self.response_time_ms > policy.degraded_latency.as_millis() as u64;
        match (self.status, slow) {
            (HealthStatus::Healthy, true) => {
                self.status = HealthStatus::Degraded;
                self.message = Some(format!(
                    "Probe took {}ms (budget {}ms)",
                    self.response_time_ms,
                    policy.degraded_latency.as_millis()
                ));
            }
            (HealthStatus::Degraded, false) => {
                self.status = HealthStatus::Healthy;
                self.message = None;
            }
            _ => {}
        }
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Run a probe body and turn its outcome into a health record.
pub(crate) async fn probe<F, Fut>(
    backend: &str,
    kind: BackendKind,
    details: HashMap<String, String>,
    body: F,
) -> StorageHealth
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();
    let result = body().await;
    let elapsed = start.elapsed();

    let (status, message) = match result {
        Ok(()) if elapsed > DEFAULT_DEGRADED_LATENCY => (
            HealthStatus::Degraded,
            Some(format!("Probe took {}ms", elapsed.as_millis())),
        ),
        Ok(()) => (HealthStatus::Healthy, None),
        Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
    };

    debug!(
        "Health probe for {}: {:?} in {}ms",
        backend,
        status,
        elapsed.as_millis()
    );

    StorageHealth {
        backend: backend.to_string(),
        kind,
        status,
        response_time_ms: elapsed.as_millis() as u64,
        success_rate: 1.0,
        last_checked: Utc::now(),
        message,
        details,
    }
}

/// Aggregate health across all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Healthy when all are healthy, unhealthy when none is usable
    pub status: HealthStatus,
    /// Per-backend results in priority order
    pub backends: Vec<StorageHealth>,
}

impl HealthReport {
    pub fn from_backends(backends: Vec<StorageHealth>) -> Self {
        let status = aggregate_status(backends.iter().map(|h| h.status));
        Self { status, backends }
    }
}

/// Healthy if every status is healthy, unhealthy if none is usable, degraded otherwise.
pub fn aggregate_status(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
    let mut total = 0usize;
    let mut healthy = 0usize;
    let mut usable = 0usize;
    for status in statuses {
        total += 1;
        match status {
            HealthStatus::Healthy => {
                healthy += 1;
                usable += 1;
            }
            HealthStatus::Degraded => usable += 1,
            HealthStatus::Unhealthy => {}
        }
    }

    if total == 0 || usable == 0 {
        HealthStatus::Unhealthy
    } else if healthy == total {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

struct BackendHealthState {
    latest: Option<StorageHealth>,
    consecutive_failures: u32,
    failure_threshold: u32,
}

/// Latest probe result and consecutive-failure count per backend.
pub struct HealthMonitor {
    backends: RwLock<HashMap<String, BackendHealthState>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Register a backend with its probe failure threshold.
    pub fn register(&self, backend: &str, failure_threshold: u32) {
        self.backends.write().insert(
            backend.to_string(),
            BackendHealthState {
                latest: None,
                consecutive_failures: 0,
                failure_threshold: failure_threshold.max(1),
            },
        );
        debug!("Registered health component: {}", backend);
    }

    /// Record a probe result.
    pub fn record(&self, health: StorageHealth) {
        let mut backends = self.backends.write();
        let state = backends
            .entry(health.backend.clone())
            .or_insert(BackendHealthState {
                latest: None,
                consecutive_failures: 0,
                failure_threshold: 1,
            });

        let was_routable = state.consecutive_failures < state.failure_threshold;

        if health.status == HealthStatus::Unhealthy {
            state.consecutive_failures += 1;
        } else {
            state.consecutive_failures = 0;
        }

        let routable = state.consecutive_failures < state.failure_threshold;
        if was_routable && !routable {
            warn!(
                "Backend {} became unhealthy after {} failed probes: {:?}",
                health.backend, state.consecutive_failures, health.message
            );
        } else if !was_routable && routable {
            info!("Backend {} recovered", health.backend);
        }

        state.latest = Some(health);
    }

    /// Whether routing may use this backend. Unknown backends are routable.
    pub fn is_routable(&self, backend: &str) -> bool {
        self.backends
            .read()
            .get(backend)
            .map(|s| s.consecutive_failures < s.failure_threshold)
            .unwrap_or(true)
    }

    /// Latest probe result for a backend.
    pub fn latest(&self, backend: &str) -> Option<StorageHealth> {
        self.backends
            .read()
            .get(backend)
            .and_then(|s| s.latest.clone())
    }

    pub fn consecutive_failures(&self, backend: &str) -> u32 {
        self.backends
            .read()
            .get(backend)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }
}
