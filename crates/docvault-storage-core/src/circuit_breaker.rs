//! Circuit breaker pattern for fault tolerance.
//!
//! Each backend owns one breaker. After `failure_threshold` consecutive
//! failures the circuit opens and calls are rejected without touching the
//! backend. Once `reset_timeout` has elapsed since opening, a limited number
//! of probe calls are let through (half-open); a success closes the circuit,
//! a failure reopens it and restarts the timer.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, operations proceed normally
    Closed,
    /// Circuit is open, operations are blocked
    Open,
    /// Circuit is half-open, allowing test requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding for gauges (closed=0, open=1, half-open=2).
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before attempting to close the circuit
    pub reset_timeout: Duration,
    /// Number of successes required in half-open state to close
    pub success_threshold: u32,
    /// Concurrent probe calls allowed while half-open
    pub half_open_max_calls: u32,
    /// Name for logging
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_calls: 1,
            name: "circuit".to_string(),
        }
    }
}

/// Circuit breaker for managing failure states
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        debug!("Created circuit breaker: {}", config.name);
        Self {
            config,
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.maybe_transition_to_half_open(&mut state);
        state.state
    }

    /// Consecutive failures recorded while closed
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Check if the circuit allows the operation without reserving a probe slot
    pub fn is_allowed(&self) -> bool {
        let mut state = self.state.lock();
        self.maybe_transition_to_half_open(&mut state);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => state.half_open_in_flight < self.half_open_limit(),
        }
    }

    /// Admit a call. In half-open state this reserves one of the probe slots,
    /// which must be returned through `record_success`, `record_failure` or `release`.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.maybe_transition_to_half_open(&mut state);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < self.half_open_limit() {
                    state.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Return a probe slot without judging the backend
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                // Reset failure count on success
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                state.success_count += 1;
                debug!(
                    "[{}] Success in half-open state ({}/{})",
                    self.config.name, state.success_count, self.config.success_threshold
                );

                if state.success_count >= self.config.success_threshold {
                    info!("[{}] Circuit closing after successful test", self.config.name);
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                    state.half_open_in_flight = 0;
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                debug!(
                    "[{}] Failure recorded ({}/{})",
                    self.config.name, state.failure_count, self.config.failure_threshold
                );

                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        "[{}] Circuit opening after {} failures",
                        self.config.name, state.failure_count
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("[{}] Test request failed, circuit reopening", self.config.name);
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.success_count = 0;
                state.half_open_in_flight = 0;
            }
            CircuitState::Open => {
                // Already open
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        info!("[{}] Circuit manually reset", self.config.name);
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
        state.half_open_in_flight = 0;
    }

    /// Half-open admits at least one probe, whatever the configuration says
    fn half_open_limit(&self) -> u32 {
        self.config.half_open_max_calls.max(1)
    }

    /// Check if we should transition from open to half-open
    fn maybe_transition_to_half_open(&self, state: &mut CircuitBreakerState) {
        if state.state == CircuitState::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    info!(
                        "[{}] Circuit transitioning to half-open after {:?}",
                        self.config.name, self.config.reset_timeout
                    );
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    state.half_open_in_flight = 0;
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Only transient failures count against the circuit; validation,
    /// not-found and similar errors say nothing about backend health.
    pub async fn call<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.try_acquire() {
            return Err(Error::Storage(StorageError::CircuitOpen {
                backend: self.config.name.clone(),
            }));
        }

        match operation.await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) if e.is_retryable() => {
                self.record_failure();
                Err(e)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }
}
