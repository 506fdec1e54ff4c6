//! Storage settings and backend resolution.
//!
//! Settings come from the environment ([`StorageSettings::from_env`]) or a
//! YAML document ([`StorageSettings::from_yaml_str`]); both yield the same
//! structure, which [`StorageSettings::resolve_backends`] turns into the
//! ordered backend list the orchestrator routes over.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::health::HealthCheckPolicy;
use crate::metrics::{OutcomeRecorder, PrometheusMetrics, DEFAULT_BUFFER_SIZE};
use crate::orchestrator::StorageOrchestrator;
use crate::retry::RetryPolicy;
use crate::storage::{
    AzureConfig, BackendConfig, ConnectionParams, S3Config, UploadLimits, DEFAULT_MAX_FILE_SIZE,
};
use crate::{Error, Result};

/// Which backend is designated primary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// First configured cloud backend, or local when there is none
    #[default]
    Auto,
    S3,
    Azure,
    Local,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::Auto => "auto",
            StorageProvider::S3 => "s3",
            StorageProvider::Azure => "azure",
            StorageProvider::Local => "local",
        }
    }
}

impl FromStr for StorageProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StorageProvider::Auto),
            "s3" | "aws" => Ok(StorageProvider::S3),
            "azure" => Ok(StorageProvider::Azure),
            "local" | "filesystem" => Ok(StorageProvider::Local),
            other => Err(Error::Config(format!(
                "Unknown storage provider '{}' (expected auto, s3, azure or local)",
                other
            ))),
        }
    }
}

/// Retry settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    /// Attempts including the first
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

/// Circuit breaker settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive transient failures before the circuit opens
    pub threshold: u32,
    /// Cooldown before a half-open probe
    pub timeout_ms: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 60_000,
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

/// Background health-check settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub degraded_latency_ms: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            failure_threshold: 3,
            degraded_latency_ms: 2_000,
        }
    }
}

/// S3 connection settings. The backend is only configured when a bucket is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub prefix: Option<String>,
}

/// Azure Blob connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub account_name: Option<String>,
    pub container_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
}

/// Local filesystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub enabled: bool,
    pub path: PathBuf,
    /// Capacity ceiling in bytes
    pub max_size: Option<u64>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./uploads"),
            max_size: None,
        }
    }
}

/// Complete storage-layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Designated primary backend
    pub provider: StorageProvider,
    /// Whether cloud backends may fall back to the next candidate
    pub fallback_enabled: bool,
    /// Talk to MinIO / Azurite instead of the real services
    pub use_emulator: bool,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Ceiling for a whole retry sequence
    pub total_timeout_ms: u64,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub health_check: HealthCheckSettings,
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
    /// Outcomes retained per operation
    pub metrics_buffer_size: usize,
    pub s3: S3Settings,
    pub azure: AzureSettings,
    pub local: LocalSettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Auto,
            fallback_enabled: true,
            use_emulator: false,
            timeout_ms: 30_000,
            total_timeout_ms: 120_000,
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            health_check: HealthCheckSettings::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: vec!["*/*".to_string()],
            metrics_buffer_size: DEFAULT_BUFFER_SIZE,
            s3: S3Settings::default(),
            azure: AzureSettings::default(),
            local: LocalSettings::default(),
        }
    }
}

impl StorageSettings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let provider = match var("STORAGE_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.provider,
        };

        let mut settings = Self {
            provider,
            fallback_enabled: parse_bool(&var, "STORAGE_FALLBACK_ENABLED", defaults.fallback_enabled)?,
            use_emulator: parse_bool(&var, "STORAGE_USE_EMULATOR", defaults.use_emulator)?,
            timeout_ms: parse_var(&var, "STORAGE_TIMEOUT_MS", defaults.timeout_ms)?,
            total_timeout_ms: parse_var(&var, "STORAGE_TOTAL_TIMEOUT_MS", defaults.total_timeout_ms)?,
            retry: RetrySettings {
                enabled: parse_bool(&var, "STORAGE_RETRY_ENABLED", defaults.retry.enabled)?,
                attempts: parse_var(&var, "STORAGE_RETRY_ATTEMPTS", defaults.retry.attempts)?,
                base_delay_ms: parse_var(
                    &var,
                    "STORAGE_RETRY_BASE_DELAY_MS",
                    defaults.retry.base_delay_ms,
                )?,
                multiplier: parse_var(&var, "STORAGE_RETRY_MULTIPLIER", defaults.retry.multiplier)?,
                max_backoff_ms: parse_var(
                    &var,
                    "STORAGE_RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff_ms,
                )?,
            },
            circuit_breaker: CircuitBreakerSettings {
                threshold: parse_var(
                    &var,
                    "STORAGE_CIRCUIT_BREAKER_THRESHOLD",
                    defaults.circuit_breaker.threshold,
                )?,
                timeout_ms: parse_var(
                    &var,
                    "STORAGE_CIRCUIT_BREAKER_TIMEOUT_MS",
                    defaults.circuit_breaker.timeout_ms,
                )?,
                success_threshold: parse_var(
                    &var,
                    "STORAGE_CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                    defaults.circuit_breaker.success_threshold,
                )?,
                half_open_max_calls: parse_var(
                    &var,
                    "STORAGE_CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS",
                    defaults.circuit_breaker.half_open_max_calls,
                )?,
            },
            health_check: HealthCheckSettings {
                interval_ms: parse_var(
                    &var,
                    "STORAGE_HEALTH_CHECK_INTERVAL_MS",
                    defaults.health_check.interval_ms,
                )?,
                timeout_ms: parse_var(
                    &var,
                    "STORAGE_HEALTH_CHECK_TIMEOUT_MS",
                    defaults.health_check.timeout_ms,
                )?,
                failure_threshold: parse_var(
                    &var,
                    "STORAGE_HEALTH_CHECK_FAILURE_THRESHOLD",
                    defaults.health_check.failure_threshold,
                )?,
                degraded_latency_ms: parse_var(
                    &var,
                    "STORAGE_HEALTH_DEGRADED_LATENCY_MS",
                    defaults.health_check.degraded_latency_ms,
                )?,
            },
            max_file_size: parse_var(&var, "STORAGE_MAX_FILE_SIZE", defaults.max_file_size)?,
            allowed_mime_types: defaults.allowed_mime_types,
            metrics_buffer_size: parse_var(
                &var,
                "STORAGE_METRICS_BUFFER_SIZE",
                defaults.metrics_buffer_size,
            )?,
            s3: S3Settings {
                bucket: var("AWS_S3_BUCKET"),
                region: var("AWS_REGION"),
                endpoint: var("AWS_S3_ENDPOINT"),
                access_key_id: var("AWS_ACCESS_KEY_ID"),
                secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
                prefix: var("AWS_S3_PREFIX"),
            },
            azure: AzureSettings {
                account_name: var("AZURE_STORAGE_ACCOUNT_NAME"),
                container_name: var("AZURE_STORAGE_CONTAINER_NAME"),
                account_key: var("AZURE_STORAGE_ACCOUNT_KEY"),
                sas_token: var("AZURE_STORAGE_SAS_TOKEN"),
                endpoint: var("AZURE_STORAGE_ENDPOINT"),
                prefix: var("AZURE_STORAGE_PREFIX"),
            },
            local: LocalSettings {
                enabled: parse_bool(&var, "LOCAL_STORAGE_ENABLED", defaults.local.enabled)?,
                path: var("LOCAL_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.local.path),
                max_size: var("LOCAL_STORAGE_MAX_SIZE")
                    .map(|v| parse_value("LOCAL_STORAGE_MAX_SIZE", &v))
                    .transpose()?,
            },
        };

        if let Some(mime_types) = var("STORAGE_ALLOWED_MIME_TYPES") {
            settings.allowed_mime_types = mime_types
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from YAML. Omitted fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make a policy meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("STORAGE_TIMEOUT_MS", self.timeout_ms),
            ("STORAGE_TOTAL_TIMEOUT_MS", self.total_timeout_ms),
            ("STORAGE_RETRY_ATTEMPTS", u64::from(self.retry.attempts)),
            (
                "STORAGE_CIRCUIT_BREAKER_THRESHOLD",
                u64::from(self.circuit_breaker.threshold),
            ),
            (
                "STORAGE_CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                u64::from(self.circuit_breaker.success_threshold),
            ),
            (
                "STORAGE_CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS",
                u64::from(self.circuit_breaker.half_open_max_calls),
            ),
            (
                "STORAGE_HEALTH_CHECK_INTERVAL_MS",
                self.health_check.interval_ms,
            ),
            ("STORAGE_HEALTH_CHECK_TIMEOUT_MS", self.health_check.timeout_ms),
            (
                "STORAGE_HEALTH_CHECK_FAILURE_THRESHOLD",
                u64::from(self.health_check.failure_threshold),
            ),
            ("STORAGE_MAX_FILE_SIZE", self.max_file_size),
            ("STORAGE_METRICS_BUFFER_SIZE", self.metrics_buffer_size as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "STORAGE_RETRY_MULTIPLIER must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(Error::Config(
                "STORAGE_ALLOWED_MIME_TYPES must list at least one type".to_string(),
            ));
        }
        if self.local.max_size == Some(0) {
            return Err(Error::Config(
                "LOCAL_STORAGE_MAX_SIZE must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Upload limits applied to every backend.
    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            allowed_mime_types: self.allowed_mime_types.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.retry.enabled,
            max_attempts: self.retry.attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            jitter: true,
            attempt_timeout: Some(Duration::from_millis(self.timeout_ms)),
            total_timeout: Some(Duration::from_millis(self.total_timeout_ms)),
        }
    }

    pub fn health_check_policy(&self) -> HealthCheckPolicy {
        HealthCheckPolicy {
            interval: Duration::from_millis(self.health_check.interval_ms),
            timeout: Duration::from_millis(self.health_check.timeout_ms),
            failure_threshold: self.health_check.failure_threshold,
            degraded_latency: Duration::from_millis(self.health_check.degraded_latency_ms),
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.threshold,
            reset_timeout: Duration::from_millis(self.circuit_breaker.timeout_ms),
            success_threshold: self.circuit_breaker.success_threshold,
            half_open_max_calls: self.circuit_breaker.half_open_max_calls,
            ..Default::default()
        }
    }

    /// S3 connection parameters, if the bucket and credentials are present.
    pub fn s3_config(&self) -> Option<S3Config> {
        let s3 = &self.s3;
        let bucket = s3.bucket.clone()?;

        if self.use_emulator {
            let mut config = S3Config::emulator(bucket);
            if let Some(endpoint) = &s3.endpoint {
                config.endpoint = Some(endpoint.clone());
            }
            if let (Some(key), Some(secret)) = (&s3.access_key_id, &s3.secret_access_key) {
                config.access_key_id = Some(key.clone());
                config.secret_access_key = Some(secret.clone());
            }
            config.prefix = s3.prefix.clone();
            return Some(config);
        }

        let (access_key_id, secret_access_key) =
            (s3.access_key_id.clone()?, s3.secret_access_key.clone()?);
        Some(S3Config {
            bucket,
            region: Some(s3.region.clone().unwrap_or_else(|| "us-east-1".to_string())),
            allow_http: s3
                .endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with("http://")),
            endpoint: s3.endpoint.clone(),
            access_key_id: Some(access_key_id),
            secret_access_key: Some(secret_access_key),
            prefix: s3.prefix.clone(),
        })
    }

    /// Azure connection parameters, if the account, container and a credential are present.
    pub fn azure_config(&self) -> Option<AzureConfig> {
        let azure = &self.azure;
        let container_name = azure.container_name.clone()?;

        if self.use_emulator {
            let mut config = AzureConfig::emulator(container_name);
            if let Some(account) = &azure.account_name {
                config.account_name = account.clone();
            }
            if azure.account_key.is_some() || azure.sas_token.is_some() {
                config.account_key = azure.account_key.clone();
                config.sas_token = azure.sas_token.clone();
            }
            config.endpoint = azure.endpoint.clone();
            config.prefix = azure.prefix.clone();
            return Some(config);
        }

        let account_name = azure.account_name.clone()?;
        if azure.account_key.is_none() && azure.sas_token.is_none() {
            return None;
        }
        Some(AzureConfig {
            account_name,
            container_name,
            account_key: azure.account_key.clone(),
            sas_token: azure.sas_token.clone(),
            prefix: azure.prefix.clone(),
            endpoint: azure.endpoint.clone(),
            ..Default::default()
        })
    }

    /// Resolve the ordered backend list.
    ///
    /// The designated primary gets priority 1, remaining cloud backends follow
    /// (S3 before Azure) and local comes last unless it is the primary.
    pub fn resolve_backends(&self) -> Result<Vec<BackendConfig>> {
        self.validate()?;

        let mut cloud: Vec<(StorageProvider, ConnectionParams)> = Vec::new();
        if let Some(config) = self.s3_config() {
            cloud.push((StorageProvider::S3, ConnectionParams::S3(config)));
        } else if self.s3.bucket.is_some() {
            debug!("AWS_S3_BUCKET set without credentials, S3 backend not configured");
        }
        if let Some(config) = self.azure_config() {
            cloud.push((StorageProvider::Azure, ConnectionParams::Azure(config)));
        } else if self.azure.container_name.is_some() {
            debug!("Azure container set without account or credential, Azure backend not configured");
        }

        let local = self.local.enabled.then(|| ConnectionParams::Local {
            root: self.local.path.clone(),
            max_capacity: self.local.max_size,
        });

        let primary = match self.provider {
            StorageProvider::Auto => cloud
                .first()
                .map(|(provider, _)| *provider)
                .unwrap_or(StorageProvider::Local),
            StorageProvider::Local => {
                if local.is_none() {
                    return Err(Error::Config(
                        "STORAGE_PROVIDER is local but LOCAL_STORAGE_ENABLED is false".to_string(),
                    ));
                }
                StorageProvider::Local
            }
            explicit => {
                if !cloud.iter().any(|(provider, _)| *provider == explicit) {
                    return Err(Error::Config(format!(
                        "STORAGE_PROVIDER is {} but that backend is not configured",
                        explicit.as_str()
                    )));
                }
                explicit
            }
        };

        let mut ordered: Vec<(StorageProvider, ConnectionParams)> = Vec::new();
        if let Some(index) = cloud.iter().position(|(provider, _)| *provider == primary) {
            ordered.push(cloud.remove(index));
        }
        let local_first = primary == StorageProvider::Local;
        if local_first {
            ordered.extend(local.clone().map(|params| (StorageProvider::Local, params)));
        }
        ordered.extend(cloud);
        if !local_first {
            ordered.extend(local.map(|params| (StorageProvider::Local, params)));
        }

        if ordered.is_empty() {
            return Err(Error::Config(
                "No storage backend configured: set cloud credentials or enable local storage"
                    .to_string(),
            ));
        }

        let backends: Vec<BackendConfig> = ordered
            .into_iter()
            .enumerate()
            .map(|(index, (provider, params))| {
                let fallback = provider == StorageProvider::Local || self.fallback_enabled;
                BackendConfig::new(provider.as_str(), index as u32 + 1, params)
                    .with_fallback(fallback)
                    .with_limits(self.upload_limits())
                    .with_retry(self.retry_policy())
                    .with_health_check(self.health_check_policy())
                    .with_circuit_breaker(self.circuit_breaker_config())
            })
            .collect();

        info!(
            "Resolved storage backends (primary {}): {}",
            primary.as_str(),
            backends
                .iter()
                .map(|b| format!("{} -> {}", b.id, b.connection.describe()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(backends)
    }

    /// Resolve backends and build an orchestrator with an outcome recorder
    /// sized by `metrics_buffer_size`.
    pub fn build_orchestrator(
        &self,
        metrics: Option<Arc<PrometheusMetrics>>,
    ) -> Result<StorageOrchestrator> {
        let mut builder = StorageOrchestrator::builder()
            .sink(Arc::new(OutcomeRecorder::new(self.metrics_buffer_size)));
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        self.resolve_backends()?
            .into_iter()
            .fold(builder, |builder, backend| builder.backend(backend))
            .build()
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: '{}' ({})", name, value, e)))
}

fn parse_var<T, V>(var: &V, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

fn parse_bool<V>(var: &V, name: &str, default: bool) -> Result<bool>
where
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!(
                "Invalid value for {}: '{}' (expected true or false)",
                name, value
            ))),
        },
        None => Ok(default),
    }
}
