//! Operation outcome recording and metrics.
//!
//! Every storage call produces exactly one [`OperationOutcome`], handed to an
//! injected [`OutcomeSink`]. The default sink, [`OutcomeRecorder`], keeps a
//! bounded history per operation (oldest evicted first) and derives each
//! backend's rolling success rate from it. Tests can swap in [`NullSink`].
//!
//! ## Modules
//!
//! - [`labels`] - Label types for Prometheus metrics dimensions
//! - [`registry`] - The `PrometheusMetrics` registry
//! - [`instrumented_storage`] - Strategy decorator that records outcomes and metrics

pub mod instrumented_storage;
pub mod labels;
pub mod registry;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::health::HealthStatus;
use crate::Error;

pub use instrumented_storage::InstrumentedStrategy;
pub use labels::{
    BackendLabels, OperationStatus, OutcomeLabels, StorageErrorLabels, StorageLabels,
    StorageOperation,
};
pub use registry::PrometheusMetrics;

/// Default number of outcomes retained per operation.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// What a call produced: a typed payload summary or a classified error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeDetail {
    Uploaded { locator: String, bytes: u64 },
    Downloaded { bytes: u64 },
    /// Boolean result of delete, exists, copy, move and create_directory
    Flag { value: bool },
    Listed { count: usize },
    Described { path: String, size: u64 },
    Stats { file_count: u64, used_bytes: u64 },
    Health { status: HealthStatus },
    Url,
    Failed { kind: ErrorKind, message: String },
}

/// Record of a single backend call.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub operation: StorageOperation,
    /// Backend identifier
    pub backend: String,
    pub success: bool,
    #[serde(serialize_with = "serialize_duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub detail: OutcomeDetail,
}

fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl OperationOutcome {
    pub fn success(
        operation: StorageOperation,
        backend: impl Into<String>,
        duration: Duration,
        detail: OutcomeDetail,
    ) -> Self {
        Self {
            operation,
            backend: backend.into(),
            success: true,
            duration,
            timestamp: Utc::now(),
            detail,
        }
    }

    pub fn failure(
        operation: StorageOperation,
        backend: impl Into<String>,
        duration: Duration,
        error: &Error,
    ) -> Self {
        Self {
            operation,
            backend: backend.into(),
            success: false,
            duration,
            timestamp: Utc::now(),
            detail: OutcomeDetail::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }

    /// Error classification, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.detail {
            OutcomeDetail::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Destination for operation outcomes.
pub trait OutcomeSink: Send + Sync {
    /// Record one outcome.
    fn record(&self, outcome: OperationOutcome);

    /// Retained outcomes for an operation, oldest first.
    fn outcomes(&self, operation: StorageOperation) -> Vec<OperationOutcome>;

    /// Success ratio across a backend's retained outcomes, if any exist.
    fn success_rate(&self, backend: &str) -> Option<f64>;
}

/// Bounded in-memory outcome history.
pub struct OutcomeRecorder {
    buffer_size: usize,
    history: RwLock<HashMap<StorageOperation, VecDeque<OperationOutcome>>>,
}

impl Default for OutcomeRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl OutcomeRecorder {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Total retained outcomes across all operations.
    pub fn len(&self) -> usize {
        self.history.read().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }
}

impl OutcomeSink for OutcomeRecorder {
    fn record(&self, outcome: OperationOutcome) {
        let mut history = self.history.write();
        let buffer = history.entry(outcome.operation).or_default();
        if buffer.len() >= self.buffer_size {
            buffer.pop_front();
        }
        buffer.push_back(outcome);
    }

    fn outcomes(&self, operation: StorageOperation) -> Vec<OperationOutcome> {
        self.history
            .read()
            .get(&operation)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn success_rate(&self, backend: &str) -> Option<f64> {
        let history = self.history.read();
        let (total, ok) = history
            .values()
            .flat_map(|buffer| buffer.iter())
            .filter(|o| o.backend == backend && o.operation != StorageOperation::Health)
            .fold((0usize, 0usize), |(total, ok), o| {
                (total + 1, ok + usize::from(o.success))
            });
        (total > 0).then(|| ok as f64 / total as f64)
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutcomeSink for NullSink {
    fn record(&self, _outcome: OperationOutcome) {}

    fn outcomes(&self, _operation: StorageOperation) -> Vec<OperationOutcome> {
        Vec::new()
    }

    fn success_rate(&self, _backend: &str) -> Option<f64> {
        None
    }
}
