//! Label types for Prometheus metrics.
//!
//! This module defines the label types used for metrics dimensions,
//! following the prometheus-client crate patterns.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use serde::Serialize;
use std::fmt::Write;
use std::str::FromStr;

use crate::error::ErrorKind;

/// Labels for per-backend gauges (circuit state, health).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

impl BackendLabels {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

/// Labels for storage operation metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageLabels {
    pub backend: String,
    pub operation: String,
}

impl StorageLabels {
    pub fn new(backend: impl Into<String>, operation: StorageOperation) -> Self {
        Self {
            backend: backend.into(),
            operation: operation.as_str().to_string(),
        }
    }
}

/// Labels for operation counters, split by outcome.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub backend: String,
    pub operation: String,
    pub status: OperationStatus,
}

impl OutcomeLabels {
    pub fn new(
        backend: impl Into<String>,
        operation: StorageOperation,
        status: OperationStatus,
    ) -> Self {
        Self {
            backend: backend.into(),
            operation: operation.as_str().to_string(),
            status,
        }
    }
}

/// Labels for storage error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageErrorLabels {
    pub backend: String,
    pub error_type: String,
}

impl StorageErrorLabels {
    pub fn new(backend: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            backend: backend.into(),
            error_type: kind.as_str().to_string(),
        }
    }
}

/// Operation status for duration metrics.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Failure,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Failure => "failure",
        }
    }
}

impl EncodeLabelValue for OperationStatus {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

/// Storage contract operation, used for metric labels and outcome history.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOperation {
    Upload,
    Download,
    Delete,
    Exists,
    Health,
    List,
    Copy,
    Move,
    FileInfo,
    Stats,
    CreateDirectory,
    DownloadUrl,
}

impl StorageOperation {
    pub const ALL: [StorageOperation; 12] = [
        StorageOperation::Upload,
        StorageOperation::Download,
        StorageOperation::Delete,
        StorageOperation::Exists,
        StorageOperation::Health,
        StorageOperation::List,
        StorageOperation::Copy,
        StorageOperation::Move,
        StorageOperation::FileInfo,
        StorageOperation::Stats,
        StorageOperation::CreateDirectory,
        StorageOperation::DownloadUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Upload => "upload",
            StorageOperation::Download => "download",
            StorageOperation::Delete => "delete",
            StorageOperation::Exists => "exists",
            StorageOperation::Health => "health",
            StorageOperation::List => "list",
            StorageOperation::Copy => "copy",
            StorageOperation::Move => "move",
            StorageOperation::FileInfo => "file_info",
            StorageOperation::Stats => "stats",
            StorageOperation::CreateDirectory => "create_directory",
            StorageOperation::DownloadUrl => "download_url",
        }
    }

    /// Whether the operation writes to the backend.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StorageOperation::Upload
                | StorageOperation::Delete
                | StorageOperation::Copy
                | StorageOperation::Move
                | StorageOperation::CreateDirectory
        )
    }
}

impl std::fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StorageOperation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| format!("unknown storage operation: {}", s))
    }
}

impl EncodeLabelValue for StorageOperation {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}
