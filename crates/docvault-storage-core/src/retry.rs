//! Retry with exponential backoff and jitter.
//!
//! Delay before retry `n` (1-based) is `base_delay * multiplier^(n-1)`, capped
//! at `max_backoff`, plus up to 25% random jitter (still capped). Each attempt
//! is bounded by `attempt_timeout`; the whole sequence by `total_timeout`.
//! When the next backoff would cross the total deadline the sequence stops and
//! the last observed error is returned.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::metrics::{PrometheusMetrics, StorageOperation};
use crate::{Error, Result};

/// Retry policy for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// When disabled every call gets exactly one attempt
    pub enabled: bool,
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for a single backoff
    pub max_backoff: Duration,
    /// Add random jitter to each backoff
    pub jitter: bool,
    /// Upper bound for a single attempt
    pub attempt_timeout: Option<Duration>,
    /// Upper bound for the whole retry sequence
    pub total_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            jitter: true,
            attempt_timeout: Some(Duration::from_secs(30)),
            total_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Attempts actually made for a transient failure.
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let max = self.max_backoff.as_millis() as f64;

        let clamped = if millis.is_nan() || millis < 0.0 {
            0.0
        } else if millis > max {
            max
        } else {
            millis
        };
        Duration::from_millis(clamped as u64)
    }

    /// Backoff before retry number `retry` (1-based), with jitter when enabled.
    pub fn compute_delay(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }

        let spread = base.as_millis() as u64 / 4;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff.max(base))
    }
}

/// Runs operations against one backend under a retry policy.
pub struct RetryExecutor {
    policy: RetryPolicy,
    backend: String,
    metrics: Option<Arc<PrometheusMetrics>>,
}

impl RetryExecutor {
    pub fn new(backend: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            policy,
            backend: backend.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation`, retrying transient failures.
    ///
    /// Non-transient errors (validation, not found, integrity) are returned
    /// after the first attempt. An attempt that exceeds its deadline is
    /// abandoned and counts as a transient timeout.
    pub async fn execute<F, Fut, T>(&self, operation: StorageOperation, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.effective_attempts();
        let deadline = self.policy.total_timeout.map(|t| Instant::now() + t);
        let mut attempt = 0u32;
        let mut last_error: Option<Error> = None;

        loop {
            attempt += 1;

            // Whether the total deadline rather than the attempt timeout caps this attempt
            let (budget, bounded_by_deadline) = match (self.policy.attempt_timeout, deadline) {
                (Some(t), Some(d)) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining < t {
                        (Some(remaining), true)
                    } else {
                        (Some(t), false)
                    }
                }
                (Some(t), None) => (Some(t), false),
                (None, Some(d)) => (Some(d.saturating_duration_since(Instant::now())), true),
                (None, None) => (None, false),
            };

            let result = match budget {
                Some(budget) => match tokio::time::timeout(budget, call()).await {
                    Ok(result) => result,
                    Err(_) => {
                        let timeout = Error::Storage(StorageError::Timeout(format!(
                            "{} on {} exceeded {:?} (attempt {})",
                            operation, self.backend, budget, attempt
                        )));
                        if bounded_by_deadline {
                            warn!(
                                "[{}] {} total timeout reached during attempt {}",
                                self.backend, operation, attempt
                            );
                            return Err(last_error.unwrap_or(timeout));
                        }
                        Err(timeout)
                    }
                },
                None => call().await,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "[{}] {} succeeded on attempt {}/{}",
                            self.backend, operation, attempt, max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                if max_attempts > 1 {
                    warn!(
                        "[{}] {} failed after {} attempts: {}",
                        self.backend, operation, attempt, error
                    );
                }
                return Err(error);
            }

            let delay = self.policy.compute_delay(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    warn!(
                        "[{}] {} giving up after {} attempts: total timeout reached",
                        self.backend, operation, attempt
                    );
                    return Err(error);
                }
            }

            debug!(
                "[{}] {} attempt {}/{} failed: {}. Retrying in {:?}",
                self.backend, operation, attempt, max_attempts, error, delay
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(&self.backend, operation);
            }
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }
}
