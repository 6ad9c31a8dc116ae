//! Connection Recovery Manager
//!
//! Drives a cancellable background retry loop for a single connection using
//! exponential backoff with optional jitter. Every manager owns its attempt
//! counter and state; nothing is shared between instances.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::core::ErrorInfo;
use super::signal::StopSignal;
use crate::error::types::conversions::panic_to_error;
use crate::error::types::{ResilienceError, Result, is_retryable_code};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry configuration for connection recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum number of connection attempts
    pub max_retries: u32,
    /// Delay before the first attempt
    #[serde(with = "crate::config::duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay
    #[serde(with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    /// Backoff multiplier (exponential)
    pub backoff_multiplier: f64,
    /// Enable jitter to avoid synchronized retry storms
    pub jitter_enabled: bool,
    /// Jitter width as a percentage of the delay, applied in both directions
    pub jitter_range_percent: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            jitter_range_percent: 25,
        }
    }
}

impl RecoveryConfig {
    /// Set the maximum number of attempts
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial and maximum delays
    #[must_use]
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the multiplier is below 1.0 or not finite, the
    /// initial delay exceeds the maximum delay, or the jitter range exceeds 100%.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::InvalidConfiguration(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ResilienceError::InvalidConfiguration(
                "initial_delay must not exceed max_delay".to_string(),
            ));
        }
        if self.jitter_range_percent > 100 {
            return Err(ResilienceError::InvalidConfiguration(
                "jitter_range_percent must be within 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

/// Un-jittered backoff delay for a 1-based attempt number:
/// `min(initial_delay * multiplier^(attempt - 1), max_delay)`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calculate_backoff_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let initial_nanos = config.initial_delay.as_nanos() as f64;
    let max_nanos = config.max_delay.as_nanos() as f64;
    let scaled = initial_nanos * config.backoff_multiplier.powi(exponent);
    let capped = if scaled.is_finite() { scaled.min(max_nanos) } else { max_nanos };
    Duration::from_nanos(capped.round() as u64)
}

/// Backoff delay with uniform jitter of up to `jitter_range_percent` of the
/// delay in either direction, when jitter is enabled.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calculate_jittered_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let base = calculate_backoff_delay(config, attempt);
    if !config.jitter_enabled || config.jitter_range_percent == 0 || base.is_zero() {
        return base;
    }
    let base_nanos = base.as_nanos() as f64;
    let range = base_nanos * f64::from(config.jitter_range_percent) / 100.0;
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_nanos((base_nanos + offset).max(0.0).round() as u64)
}

/// Lifecycle of one recovery sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryState {
    /// No recovery has been started
    Idle,
    /// Background loop is retrying
    InProgress,
    /// A connection attempt succeeded
    Succeeded,
    /// All attempts were exhausted
    Failed,
    /// Recovery was stopped before it finished
    Aborted,
}

/// Connection handle the recovery manager drives.
///
/// Implemented by the transport layer. Timeouts of individual attempts belong
/// to `connect`, not to the manager.
pub trait RecoverableConnection: Send + Sync {
    /// Whether the connection is currently usable
    fn is_connected(&self) -> bool;

    /// Attempt to (re)establish the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt failed.
    fn connect(&self) -> Result<()>;
}

/// Snapshot of a manager's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    /// Current state
    pub state: RecoveryState,
    /// Attempts made in the current or last sequence
    pub attempts: u32,
    /// Configured attempt limit
    pub max_retries: u32,
    /// Error code that started the sequence
    pub trigger_code: Option<u32>,
    /// Last connection failure
    pub last_error: Option<String>,
    /// Delay used before the last attempt
    pub last_delay: Option<Duration>,
}

/// Observer of recovery progress: `(state, attempts so far)`
pub type RecoveryListener = Arc<dyn Fn(RecoveryState, u32) + Send + Sync>;

struct RecoveryInternalState {
    config: RecoveryConfig,
    state: RecoveryState,
    attempts: u32,
    trigger_code: Option<u32>,
    last_error: Option<String>,
    last_delay: Option<Duration>,
}

struct RecoveryShared {
    connection: Arc<dyn RecoverableConnection>,
    internal_state: Mutex<RecoveryInternalState>,
    finished: Condvar,
    stop: StopSignal,
    listener: RwLock<Option<RecoveryListener>>,
}

impl RecoveryShared {
    fn lock(&self) -> MutexGuard<'_, RecoveryInternalState> {
        self.internal_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, state: RecoveryState, attempts: u32) {
        let listener =
            self.listener.read().unwrap_or_else(PoisonError::into_inner).as_ref().map(Arc::clone);
        if let Some(listener) = listener {
            listener(state, attempts);
        }
    }

    fn attempt_connection(&self) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }
        match catch_unwind(AssertUnwindSafe(|| self.connection.connect())) {
            Ok(result) => result,
            Err(payload) => Err(panic_to_error(payload.as_ref())),
        }
    }

    /// Finish the sequence unless `stop_recovery` already claimed it.
    fn finish(&self, state: RecoveryState) -> Option<u32> {
        let mut internal_state = self.lock();
        if internal_state.state != RecoveryState::InProgress {
            return None;
        }
        internal_state.state = state;
        self.finished.notify_all();
        Some(internal_state.attempts)
    }

    fn run(&self) {
        loop {
            let (attempt, delay) = {
                let mut internal_state = self.lock();
                if self.stop.is_stopped() {
                    return;
                }
                if internal_state.attempts >= internal_state.config.max_retries {
                    drop(internal_state);
                    if let Some(attempts) = self.finish(RecoveryState::Failed) {
                        error!(attempts, "Connection recovery exhausted all attempts");
                        self.notify(RecoveryState::Failed, attempts);
                    }
                    return;
                }
                internal_state.attempts = internal_state.attempts.saturating_add(1);
                let delay = calculate_jittered_delay(&internal_state.config, internal_state.attempts);
                internal_state.last_delay = Some(delay);
                (internal_state.attempts, delay)
            };

            debug!(attempt, delay_ms = delay.as_millis(), "Waiting before connection attempt");
            if self.stop.wait(delay) {
                return;
            }

            match self.attempt_connection() {
                Ok(()) => {
                    if self.finish(RecoveryState::Succeeded).is_some() {
                        info!(attempt, "Connection recovered");
                        self.notify(RecoveryState::Succeeded, attempt);
                    }
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Connection attempt failed");
                    self.lock().last_error = Some(err.to_string());
                    self.notify(RecoveryState::InProgress, attempt);
                }
            }
        }
    }
}

/// Exponential-backoff retry engine for one connection
pub struct ConnectionRecoveryManager {
    shared: Arc<RecoveryShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionRecoveryManager {
    /// Create a manager for `connection` with default config
    #[must_use]
    pub fn new(connection: Arc<dyn RecoverableConnection>) -> Self {
        Self::with_config(connection, RecoveryConfig::default())
    }

    /// Create a manager for `connection` with custom config
    #[must_use]
    pub fn with_config(connection: Arc<dyn RecoverableConnection>, config: RecoveryConfig) -> Self {
        Self {
            shared: Arc::new(RecoveryShared {
                connection,
                internal_state: Mutex::new(RecoveryInternalState {
                    config,
                    state: RecoveryState::Idle,
                    attempts: 0,
                    trigger_code: None,
                    last_error: None,
                    last_delay: None,
                }),
                finished: Condvar::new(),
                stop: StopSignal::new(),
                listener: RwLock::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start a background recovery sequence for `error`.
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::NonRetryable`] if the error code is never retried;
    ///   no background work is started.
    /// - [`ResilienceError::InvalidState`] if a sequence is already in progress.
    /// - [`ResilienceError::Internal`] if the worker thread cannot be spawned.
    pub fn start_recovery(&self, error: &ErrorInfo) -> Result<()> {
        if !is_retryable_code(error.code) {
            warn!(code = error.code, component = %error.component, "Refusing to retry non-retryable error");
            return Err(ResilienceError::NonRetryable { code: error.code });
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut internal_state = self.shared.lock();
            if internal_state.state == RecoveryState::InProgress {
                return Err(ResilienceError::InvalidState(
                    "connection recovery already in progress".to_string(),
                ));
            }
            internal_state.state = RecoveryState::InProgress;
            internal_state.attempts = 0;
            internal_state.trigger_code = Some(error.code);
            internal_state.last_error = None;
            internal_state.last_delay = None;
        }

        // The previous worker already reached a terminal state and is exiting
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }
        self.shared.stop.reset();

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("connection-recovery".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                drop(worker);
                info!(code = error.code, component = %error.component, "Connection recovery started");
                self.shared.notify(RecoveryState::InProgress, 0);
                Ok(())
            }
            Err(err) => {
                self.shared.finish(RecoveryState::Failed);
                Err(ResilienceError::from(err))
            }
        }
    }

    /// Cancel the running sequence and join the worker before returning
    pub fn stop_recovery(&self) {
        // Held until the sequence is aborted so a concurrent start cannot
        // re-arm the signal in between.
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.stop.stop();
        if let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            error!("Connection recovery worker panicked");
        }
        let aborted = self.shared.finish(RecoveryState::Aborted);
        drop(worker);

        if let Some(attempts) = aborted {
            info!(attempts, "Connection recovery aborted");
            self.shared.notify(RecoveryState::Aborted, attempts);
        }
    }

    /// Current progress
    #[must_use]
    pub fn status(&self) -> RecoveryStatus {
        let internal_state = self.shared.lock();
        RecoveryStatus {
            state: internal_state.state,
            attempts: internal_state.attempts,
            max_retries: internal_state.config.max_retries,
            trigger_code: internal_state.trigger_code,
            last_error: internal_state.last_error.clone(),
            last_delay: internal_state.last_delay,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.shared.lock().state
    }

    /// Block until the sequence leaves `InProgress` or `timeout` elapses
    #[must_use]
    pub fn wait_for_completion(&self, timeout: Duration) -> RecoveryState {
        let guard = self.shared.lock();
        let (guard, _timed_out) = self
            .shared
            .finished
            .wait_timeout_while(guard, timeout, |s| s.state == RecoveryState::InProgress)
            .unwrap_or_else(PoisonError::into_inner);
        guard.state
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> RecoveryConfig {
        self.shared.lock().config.clone()
    }

    /// Replace the configuration; the running loop uses it from its next attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn update_config(&self, config: RecoveryConfig) -> Result<()> {
        config.validate()?;
        self.shared.lock().config = config;
        Ok(())
    }

    /// Install or clear the progress listener
    pub fn set_listener(&self, listener: Option<RecoveryListener>) {
        *self.shared.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }
}

impl Drop for ConnectionRecoveryManager {
    fn drop(&mut self) {
        self.stop_recovery();
    }
}
