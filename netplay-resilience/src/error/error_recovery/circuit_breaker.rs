//! Circuit Breaker for Protecting Against Cascading Failures
//!
//! This module implements the circuit breaker pattern so that a dead room
//! server or relay is not hammered with requests. The breaker only gates and
//! measures calls; retrying is the connection recovery manager's job.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use crate::error::types::conversions::panic_to_error;
use crate::error::types::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state for external service failure protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    /// Circuit is closed - normal operation, requests flow through
    Closed,
    /// Circuit is open - service is failing, requests are rejected immediately
    Open,
    /// Circuit is half-open - a bounded number of trial calls test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before trial calls are admitted
    #[serde(with = "crate::config::duration_ms")]
    pub timeout_duration: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold_for_close: u32,
    /// Trial calls allowed to run at once while half-open
    pub max_concurrent_half_open_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_duration: Duration::from_secs(60),
            success_threshold_for_close: 3,
            max_concurrent_half_open_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the open timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout;
        self
    }

    /// Set the half-open success threshold
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold_for_close = threshold;
        self
    }

    /// Set the half-open concurrency limit
    #[must_use]
    pub fn with_max_half_open_calls(mut self, calls: u32) -> Self {
        self.max_concurrent_half_open_calls = calls;
        self
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any threshold or the half-open limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfiguration(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold_for_close == 0 {
            return Err(ResilienceError::InvalidConfiguration(
                "success_threshold_for_close must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_half_open_calls == 0 {
            return Err(ResilienceError::InvalidConfiguration(
                "max_concurrent_half_open_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time snapshot of circuit breaker metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitBreakerState,
    /// Every call to `execute`, admitted or not
    pub total_requests: u64,
    /// Calls that completed successfully
    pub successful_requests: u64,
    /// Calls that failed or panicked
    pub failed_requests: u64,
    /// Calls rejected without running
    pub rejected_requests: u64,
    /// Current run of consecutive failures
    pub consecutive_failures: u32,
    /// `successful_requests / total_requests`
    pub success_rate: f64,
    /// `failed_requests / total_requests`
    pub failure_rate: f64,
    /// Fastest completed call
    pub min_response_time: Duration,
    /// Running average over completed calls
    pub avg_response_time: Duration,
    /// Slowest completed call
    pub max_response_time: Duration,
    /// Wall-clock time of the last state transition
    pub last_state_change: DateTime<Utc>,
    /// Time spent in the current state
    pub time_in_state: Duration,
}

/// Observer of breaker transitions: `(breaker name, from, to)`.
///
/// Invoked outside the breaker lock, so it may call back into the breaker.
pub type StateChangeListener =
    Arc<dyn Fn(&str, CircuitBreakerState, CircuitBreakerState) + Send + Sync>;

type Transition = (CircuitBreakerState, CircuitBreakerState);

/// Internal state for circuit breaker
struct CircuitBreakerInternalState {
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    last_transition: Instant,
    last_transition_at: DateTime<Utc>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    response_samples: u64,
    min_response_time: Duration,
    max_response_time: Duration,
    avg_response_secs: f64,
}

impl CircuitBreakerInternalState {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            last_transition: Instant::now(),
            last_transition_at: Utc::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            response_samples: 0,
            min_response_time: Duration::ZERO,
            max_response_time: Duration::ZERO,
            avg_response_secs: 0.0,
        }
    }

    fn transition(&mut self, to: CircuitBreakerState) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        self.last_transition_at = Utc::now();
        self.consecutive_successes = 0;
        if to == CircuitBreakerState::Closed {
            self.consecutive_failures = 0;
        }
        (from, to)
    }

    #[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
    fn record_response_time(&mut self, elapsed: Duration) {
        self.response_samples += 1;
        if self.response_samples == 1 {
            self.min_response_time = elapsed;
            self.max_response_time = elapsed;
            self.avg_response_secs = elapsed.as_secs_f64();
            return;
        }
        self.min_response_time = self.min_response_time.min(elapsed);
        self.max_response_time = self.max_response_time.max(elapsed);
        self.avg_response_secs +=
            (elapsed.as_secs_f64() - self.avg_response_secs) / self.response_samples as f64;
    }

    #[allow(clippy::cast_precision_loss)]
    fn rate(part: u64, total: u64) -> f64 {
        if total == 0 { 0.0 } else { part as f64 / total as f64 }
    }
}

/// Circuit breaker guarding one kind of fallible operation
pub struct CircuitBreaker {
    name: String,
    internal_state: Mutex<CircuitBreakerInternalState>,
    listener: RwLock<Option<StateChangeListener>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Permission to run one call; releases its half-open slot if dropped early
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    started: Instant,
    completed: bool,
}

impl Admission<'_> {
    fn complete(mut self, success: bool) {
        self.completed = true;
        self.breaker.record_outcome(self.trial, success, self.started.elapsed());
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            let mut internal_state = self.breaker.lock();
            internal_state.half_open_in_flight = internal_state.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default config
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom config
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            internal_state: Mutex::new(CircuitBreakerInternalState::new(config)),
            listener: RwLock::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerInternalState> {
        self.internal_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name used in logs, rejections and listener calls
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The breaker lock is not held while `operation` runs. A panic inside the
    /// operation is caught, counted as a failure and returned as
    /// [`ResilienceError::Internal`].
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] or
    /// [`ResilienceError::HalfOpenLimitReached`] when the call is rejected, and
    /// otherwise whatever error the operation produced.
    pub fn execute<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let admission = self.admit()?;
        let result = match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(result) => result,
            Err(payload) => Err(panic_to_error(payload.as_ref())),
        };
        admission.complete(result.is_ok());
        result
    }

    /// Execute a future on its own tokio task with circuit breaker protection.
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::execute`]; a panicking task is reported as
    /// [`ResilienceError::Internal`].
    pub async fn execute_async<T, Fut>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let admission = self.admit()?;
        let result = match tokio::spawn(operation).await {
            Ok(result) => result,
            Err(join_error) => Err(ResilienceError::from(join_error)),
        };
        admission.complete(result.is_ok());
        result
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn admit(&self) -> Result<Admission<'_>> {
        let mut transition = None;
        let decision = {
            let mut internal_state = self.lock();
            internal_state.total_requests += 1;

            if internal_state.state == CircuitBreakerState::Open
                && internal_state.last_transition.elapsed() >= internal_state.config.timeout_duration
            {
                transition = Some(internal_state.transition(CircuitBreakerState::HalfOpen));
            }

            let state = internal_state.state;
            match state {
                CircuitBreakerState::Closed => Ok(false),
                CircuitBreakerState::Open => {
                    internal_state.rejected_requests += 1;
                    Err(ResilienceError::CircuitOpen(self.name.clone()))
                }
                CircuitBreakerState::HalfOpen => {
                    if internal_state.half_open_in_flight
                        >= internal_state.config.max_concurrent_half_open_calls
                    {
                        internal_state.rejected_requests += 1;
                        Err(ResilienceError::HalfOpenLimitReached(self.name.clone()))
                    } else {
                        internal_state.half_open_in_flight += 1;
                        Ok(true)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
        if let Err(ref rejection) = decision {
            debug!(breaker = %self.name, reason = %rejection, "Circuit breaker rejected call");
        }

        decision.map(|trial| Admission {
            breaker: self,
            trial,
            started: Instant::now(),
            completed: false,
        })
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn record_outcome(&self, trial: bool, success: bool, elapsed: Duration) {
        let transition = {
            let mut internal_state = self.lock();
            if trial {
                internal_state.half_open_in_flight =
                    internal_state.half_open_in_flight.saturating_sub(1);
            }
            internal_state.record_response_time(elapsed);

            if success {
                internal_state.successful_requests += 1;
                internal_state.consecutive_failures = 0;
                // Only calls admitted as half-open trials count toward closing.
                if trial && internal_state.state == CircuitBreakerState::HalfOpen {
                    internal_state.consecutive_successes += 1;
                    (internal_state.consecutive_successes
                        >= internal_state.config.success_threshold_for_close)
                        .then(|| internal_state.transition(CircuitBreakerState::Closed))
                } else {
                    None
                }
            } else {
                internal_state.failed_requests += 1;
                internal_state.consecutive_failures =
                    internal_state.consecutive_failures.saturating_add(1);
                internal_state.consecutive_successes = 0;
                let state = internal_state.state;
                match state {
                    CircuitBreakerState::Closed
                        if internal_state.consecutive_failures
                            >= internal_state.config.failure_threshold =>
                    {
                        Some(internal_state.transition(CircuitBreakerState::Open))
                    }
                    CircuitBreakerState::HalfOpen => {
                        Some(internal_state.transition(CircuitBreakerState::Open))
                    }
                    CircuitBreakerState::Closed | CircuitBreakerState::Open => None,
                }
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    fn notify(&self, (from, to): Transition) {
        match to {
            CircuitBreakerState::Open => {
                warn!(breaker = %self.name, from = ?from, "Circuit breaker opened");
            }
            CircuitBreakerState::HalfOpen | CircuitBreakerState::Closed => {
                info!(breaker = %self.name, from = ?from, to = ?to, "Circuit breaker state changed");
            }
        }

        let listener =
            self.listener.read().unwrap_or_else(PoisonError::into_inner).as_ref().map(Arc::clone);
        if let Some(listener) = listener {
            listener(&self.name, from, to);
        }
    }

    fn force_state(&self, to: CircuitBreakerState) {
        let transition = self.lock().transition(to);
        self.notify(transition);
    }

    /// Open the circuit regardless of failure counts
    pub fn force_open(&self) {
        self.force_state(CircuitBreakerState::Open);
    }

    /// Move to half-open so the next calls act as trials
    pub fn force_half_open(&self) {
        self.force_state(CircuitBreakerState::HalfOpen);
    }

    /// Return to closed and clear every counter and metric
    pub fn reset(&self) {
        let transition = {
            let mut internal_state = self.lock();
            let config = internal_state.config.clone();
            let from = internal_state.state;
            *internal_state = CircuitBreakerInternalState::new(config);
            (from, CircuitBreakerState::Closed)
        };
        self.notify(transition);
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.lock().config.clone()
    }

    /// Replace the configuration; applies from the next state evaluation.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn update_config(&self, config: CircuitBreakerConfig) -> Result<()> {
        config.validate()?;
        self.lock().config = config;
        Ok(())
    }

    /// Install or clear the state change listener
    pub fn set_state_change_listener(&self, listener: Option<StateChangeListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Snapshot of the current metrics
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let internal_state = self.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: internal_state.state,
            total_requests: internal_state.total_requests,
            successful_requests: internal_state.successful_requests,
            failed_requests: internal_state.failed_requests,
            rejected_requests: internal_state.rejected_requests,
            consecutive_failures: internal_state.consecutive_failures,
            success_rate: CircuitBreakerInternalState::rate(
                internal_state.successful_requests,
                internal_state.total_requests,
            ),
            failure_rate: CircuitBreakerInternalState::rate(
                internal_state.failed_requests,
                internal_state.total_requests,
            ),
            min_response_time: internal_state.min_response_time,
            avg_response_time: Duration::from_secs_f64(internal_state.avg_response_secs.max(0.0)),
            max_response_time: internal_state.max_response_time,
            last_state_change: internal_state.last_transition_at,
            time_in_state: internal_state.last_transition.elapsed(),
        }
    }

    /// Metrics serialized as JSON for telemetry scraping.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn metrics_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.metrics())?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::types::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing() -> Result<()> {
        Err(ResilienceError::operation(ErrorCode::NetworkTimeout, "timed out"))
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::with_config("room", CircuitBreakerConfig::default().with_failure_threshold(2));
        let _ = cb.execute(failing);
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        let _ = cb.execute(failing);
        assert_eq!(cb.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::with_config("room", CircuitBreakerConfig::default().with_failure_threshold(2));
        let _ = cb.execute(failing);
        let _ = cb.execute(|| Ok(()));
        let _ = cb.execute(failing);
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 1);
    }

    #[test]
    fn test_panicking_operation_counts_as_failure() {
        let cb = CircuitBreaker::new("relay");
        let result: Result<()> = cb.execute(|| panic!("relay exploded"));
        assert!(matches!(result, Err(ResilienceError::Internal(ref msg)) if msg.contains("relay exploded")));
        assert_eq!(cb.metrics().failed_requests, 1);
    }

    #[test]
    fn test_response_time_running_average() {
        let mut state = CircuitBreakerInternalState::new(CircuitBreakerConfig::default());
        state.record_response_time(Duration::from_millis(10));
        state.record_response_time(Duration::from_millis(30));
        state.record_response_time(Duration::from_millis(20));
        assert_eq!(state.min_response_time, Duration::from_millis(10));
        assert_eq!(state.max_response_time, Duration::from_millis(30));
        assert!((state.avg_response_secs - 0.020).abs() < 1e-9);
    }

    #[test]
    fn test_listener_sees_forced_transitions() {
        let cb = CircuitBreaker::new("discovery");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        cb.set_state_change_listener(Some(Arc::new(move |name: &str, _from: CircuitBreakerState, to: CircuitBreakerState| {
            assert_eq!(name, "discovery");
            assert_eq!(to, CircuitBreakerState::Open);
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        cb.force_open();
        cb.force_open();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cb = CircuitBreaker::new("room");
        let bad = CircuitBreakerConfig::default().with_failure_threshold(0);
        assert!(cb.update_config(bad).is_err());
        assert_eq!(cb.config(), CircuitBreakerConfig::default());
    }

    #[test]
    fn test_dropped_admission_releases_half_open_slot() {
        let cb = CircuitBreaker::new("relay");
        cb.force_half_open();
        {
            let _admission = cb.admit().unwrap();
            assert!(matches!(cb.execute(|| Ok(())), Err(ResilienceError::HalfOpenLimitReached(_))));
        }
        assert!(cb.execute(|| Ok(())).is_ok());
    }

    #[test]
    fn test_success_admitted_while_closed_does_not_close_half_open_circuit() {
        let cb = Arc::new(CircuitBreaker::with_config(
            "relay",
            CircuitBreakerConfig::default().with_success_threshold(1),
        ));
        let (running_tx, running_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let slow = {
            let cb = Arc::clone(&cb);
            std::thread::spawn(move || {
                cb.execute(|| {
                    let _ = running_tx.send(());
                    let _ = release_rx.recv();
                    Ok(())
                })
            })
        };

        running_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        cb.force_open();
        cb.force_half_open();
        release_tx.send(()).unwrap();
        assert!(slow.join().unwrap().is_ok());
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);

        cb.execute(|| Ok(())).unwrap();
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
    }
}
