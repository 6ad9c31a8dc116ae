//! Recovery Strategies
//!
//! Pluggable strategies the [`ErrorHandler`](super::handler::ErrorHandler)
//! runs for reported errors. Each strategy decides whether it applies to an
//! error and reports the outcome through a one-shot completion. Recovery
//! work runs on threads owned by the strategy, never on the reporting
//! thread.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::connection_recovery::{RecoveryConfig, calculate_jittered_delay};
use super::core::ErrorInfo;
use super::degradation::GracefulDegradationManager;
use super::signal::StopSignal;
use super::workers::WorkerPool;
use crate::error::types::{ErrorCategory, Result, is_fallback_worthy, is_retryable_code};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// One-shot outcome callback: `true` when the error was recovered
pub type RecoveryCompletion = Box<dyn FnOnce(bool) + Send>;

/// A way of recovering from a class of errors
pub trait RecoveryStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether this strategy applies to `error`
    fn can_recover(&self, error: &ErrorInfo) -> bool;

    /// Start recovery; `completion` must be called exactly once, possibly
    /// from another thread.
    fn attempt_recovery(&self, error: ErrorInfo, completion: RecoveryCompletion);
}

/// Hand `completion` to `task` on a worker of `workers`. If the worker cannot
/// be spawned the completion is called with `false`.
fn run_on_worker<F>(workers: &WorkerPool, completion: RecoveryCompletion, task: F)
where
    F: FnOnce(&StopSignal, RecoveryCompletion) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(completion)));
    let worker_slot = Arc::clone(&slot);
    let spawned = workers.spawn(move |stop| {
        let completion = worker_slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(completion) = completion {
            task(stop, completion);
        }
    });

    if let Err(err) = spawned {
        error!(error = %err, "Failed to spawn recovery worker");
        let completion = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(completion) = completion {
            completion(false);
        }
    }
}

/// Action re-run by [`NetworkRetryStrategy`]
pub type RetryAction = Arc<dyn Fn(&ErrorInfo) -> Result<()> + Send + Sync>;

/// Retries transient network failures after a backoff delay.
///
/// Attempts are counted per error code; a successful retry clears the count
/// for that code. Each retry waits on its own worker thread and is cancelled
/// when the strategy is dropped.
pub struct NetworkRetryStrategy {
    config: RecoveryConfig,
    action: RetryAction,
    attempts: Arc<Mutex<HashMap<u32, u32>>>,
    workers: WorkerPool,
}

impl NetworkRetryStrategy {
    /// Create a strategy with the default backoff configuration
    #[must_use]
    pub fn new(action: RetryAction) -> Self {
        Self::with_config(RecoveryConfig::default(), action)
    }

    /// Create a strategy with a custom backoff configuration
    #[must_use]
    pub fn with_config(config: RecoveryConfig, action: RetryAction) -> Self {
        Self {
            config,
            action,
            attempts: Arc::new(Mutex::new(HashMap::new())),
            workers: WorkerPool::new("network-retry"),
        }
    }

    fn attempts_lock(&self) -> MutexGuard<'_, HashMap<u32, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retries made for `code` since its last success
    #[must_use]
    pub fn attempts_for(&self, code: u32) -> u32 {
        self.attempts_lock().get(&code).copied().unwrap_or(0)
    }

    /// Forget the retry count for `code`
    pub fn reset_attempts(&self, code: u32) {
        self.attempts_lock().remove(&code);
    }
}

impl RecoveryStrategy for NetworkRetryStrategy {
    fn name(&self) -> &str {
        "network-retry"
    }

    fn can_recover(&self, error: &ErrorInfo) -> bool {
        error.category == ErrorCategory::NetworkConnectivity
            && is_retryable_code(error.code)
            && self.attempts_for(error.code) < self.config.max_retries
    }

    fn attempt_recovery(&self, error: ErrorInfo, completion: RecoveryCompletion) {
        let attempt = {
            let mut attempts = self.attempts_lock();
            let count = attempts.entry(error.code).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        if attempt > self.config.max_retries {
            debug!(code = error.code, attempt, "Retry budget exhausted");
            completion(false);
            return;
        }

        let delay = calculate_jittered_delay(&self.config, attempt);
        debug!(code = error.code, attempt, delay_ms = delay.as_millis(), "Scheduling network retry");

        let attempts = Arc::clone(&self.attempts);
        let action = Arc::clone(&self.action);
        run_on_worker(&self.workers, completion, move |stop, completion| {
            if stop.wait(delay) {
                debug!(code = error.code, "Network retry cancelled");
                completion(false);
                return;
            }
            let recovered = catch_unwind(AssertUnwindSafe(|| action(&error)))
                .map(|result| result.is_ok())
                .unwrap_or(false);
            if recovered {
                attempts.lock().unwrap_or_else(PoisonError::into_inner).remove(&error.code);
                info!(code = error.code, attempt, "Network retry succeeded");
            } else {
                warn!(code = error.code, attempt, "Network retry failed");
            }
            completion(recovered);
        });
    }
}

/// User-facing prompt asking for a permission; it receives the completion.
///
/// Runs on a worker thread that is joined when the strategy is dropped, so a
/// prompt should hand the completion to the UI rather than block on the user.
pub type PermissionPrompt = Arc<dyn Fn(&ErrorInfo, RecoveryCompletion) + Send + Sync>;

/// Asks the user to grant a denied permission
pub struct PermissionRequestStrategy {
    prompt: PermissionPrompt,
    workers: WorkerPool,
}

impl PermissionRequestStrategy {
    /// Create a strategy that delegates to `prompt`
    #[must_use]
    pub fn new(prompt: PermissionPrompt) -> Self {
        Self { prompt, workers: WorkerPool::new("permission-request") }
    }
}

impl RecoveryStrategy for PermissionRequestStrategy {
    fn name(&self) -> &str {
        "permission-request"
    }

    fn can_recover(&self, error: &ErrorInfo) -> bool {
        error.category == ErrorCategory::PermissionDenied
    }

    fn attempt_recovery(&self, error: ErrorInfo, completion: RecoveryCompletion) {
        info!(code = error.code, component = %error.component, "Requesting permission from user");
        let prompt = Arc::clone(&self.prompt);
        run_on_worker(&self.workers, completion, move |_, completion| prompt(&error, completion));
    }
}

/// Mode switch run by [`FallbackModeStrategy`]; returns `true` on success
pub type ModeSwitch = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

/// Switches to a fallback multiplayer mode on a worker thread
pub struct FallbackModeStrategy {
    switch: ModeSwitch,
    workers: WorkerPool,
}

impl FallbackModeStrategy {
    /// Create a strategy that delegates to `switch`
    #[must_use]
    pub fn new(switch: ModeSwitch) -> Self {
        Self { switch, workers: WorkerPool::new("fallback-mode") }
    }

    /// Strategy that routes errors to a degradation manager.
    ///
    /// Holds a weak reference; once the manager is dropped recovery fails.
    #[must_use]
    pub fn for_degradation_manager(manager: &Arc<GracefulDegradationManager>) -> Self {
        let manager = Arc::downgrade(manager);
        Self::new(Arc::new(move |error: &ErrorInfo| {
            manager
                .upgrade()
                .is_some_and(|manager| matches!(manager.handle_error(error), Ok(Some(_))))
        }))
    }
}

impl RecoveryStrategy for FallbackModeStrategy {
    fn name(&self) -> &str {
        "fallback-mode"
    }

    fn can_recover(&self, error: &ErrorInfo) -> bool {
        is_fallback_worthy(error.code)
    }

    fn attempt_recovery(&self, error: ErrorInfo, completion: RecoveryCompletion) {
        let switch = Arc::clone(&self.switch);
        run_on_worker(&self.workers, completion, move |stop, completion| {
            if stop.is_stopped() {
                completion(false);
                return;
            }
            let switched = catch_unwind(AssertUnwindSafe(|| switch(&error))).unwrap_or(false);
            debug!(code = error.code, switched, "Fallback mode strategy finished");
            completion(switched);
        });
    }
}
