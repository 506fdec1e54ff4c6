//! Per-backend configuration resolved at startup.

use std::path::PathBuf;

use super::azure::AzureConfig;
use super::s3::S3Config;
use super::types::BackendKind;
use super::validation::UploadLimits;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::health::HealthCheckPolicy;
use crate::retry::RetryPolicy;

/// Backend-specific connection parameters.
#[derive(Debug, Clone)]
pub enum ConnectionParams {
    /// AWS S3 or S3-compatible storage
    S3(S3Config),
    /// Azure Blob Storage
    Azure(AzureConfig),
    /// Local filesystem rooted at `root`, optionally capped at `max_capacity` bytes
    Local {
        root: PathBuf,
        max_capacity: Option<u64>,
    },
    /// In-memory store (for testing)
    Memory,
}

impl ConnectionParams {
    pub fn kind(&self) -> BackendKind {
        match self {
            ConnectionParams::S3(_) => BackendKind::S3,
            ConnectionParams::Azure(_) => BackendKind::Azure,
            ConnectionParams::Local { .. } => BackendKind::Local,
            ConnectionParams::Memory => BackendKind::Memory,
        }
    }

    /// Human-readable endpoint, bucket or directory for health reports.
    pub fn describe(&self) -> String {
        match self {
            ConnectionParams::S3(c) => match &c.endpoint {
                Some(endpoint) => format!("s3://{} ({})", c.bucket, endpoint),
                None => format!("s3://{}", c.bucket),
            },
            ConnectionParams::Azure(c) => {
                format!("azure://{} (account {})", c.container_name, c.account_name)
            }
            ConnectionParams::Local { root, .. } => format!("local://{}", root.display()),
            ConnectionParams::Memory => "memory://".to_string(),
        }
    }
}

/// One configured backend. Immutable once built.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Stable identifier (`s3`, `azure`, `local`)
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether the orchestrator may route to this backend
    pub enabled: bool,
    /// Lower is tried first
    pub priority: u32,
    /// Whether a failure here may cascade to the next backend
    pub fallback_eligible: bool,
    pub connection: ConnectionParams,
    pub limits: UploadLimits,
    pub health_check: HealthCheckPolicy,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl BackendConfig {
    /// Build a configuration with default policies.
    pub fn new(id: impl Into<String>, priority: u32, connection: ConnectionParams) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            circuit_breaker: CircuitBreakerConfig {
                name: id.clone(),
                ..Default::default()
            },
            id,
            enabled: true,
            priority,
            fallback_eligible: true,
            connection,
            limits: UploadLimits::default(),
            health_check: HealthCheckPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.connection.kind()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fallback(mut self, fallback_eligible: bool) -> Self {
        self.fallback_eligible = fallback_eligible;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckPolicy) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = CircuitBreakerConfig {
            name: self.id.clone(),
            ..circuit_breaker
        };
        self
    }
}
