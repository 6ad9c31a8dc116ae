//! Graceful Degradation Management
//!
//! This module switches multiplayer between Internet, local mesh and offline
//! play when the active backend fails, and returns to the preferred mode once
//! it is healthy again.
//!
//! # Mode invariants
//!
//! - `current_mode == original_mode` implies [`DegradationState::Normal`],
//!   except for the `Failed` state reported by
//!   [`GracefulDegradationManager::initialize`] when nothing is available.
//! - [`GracefulDegradationManager::is_degraded`] is exactly
//!   `current_mode != original_mode`.
//!
//! All mode switches are logged.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::circuit_breaker::{CircuitBreakerState, StateChangeListener};
use super::core::ErrorInfo;
use super::signal::StopSignal;
use crate::error::types::{ErrorCode, ResilienceError, Result, is_fallback_worthy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Multiplayer transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiplayerMode {
    /// Room server over the Internet
    Internet,
    /// Local wireless / LAN mesh
    LocalMesh,
    /// Single player, no network
    Offline,
}

impl MultiplayerMode {
    /// Ordered fallback candidates when this mode fails
    #[must_use]
    pub fn fallback_modes(self) -> &'static [MultiplayerMode] {
        match self {
            MultiplayerMode::Internet => &[MultiplayerMode::LocalMesh, MultiplayerMode::Offline],
            MultiplayerMode::LocalMesh => &[MultiplayerMode::Internet, MultiplayerMode::Offline],
            MultiplayerMode::Offline => &[],
        }
    }

    /// Modes that are backed by a network service
    #[must_use]
    pub fn networked() -> &'static [MultiplayerMode] {
        &[MultiplayerMode::Internet, MultiplayerMode::LocalMesh]
    }
}

impl fmt::Display for MultiplayerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MultiplayerMode::Internet => "Internet",
            MultiplayerMode::LocalMesh => "LocalMesh",
            MultiplayerMode::Offline => "Offline",
        };
        f.write_str(name)
    }
}

/// Degradation state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradationState {
    /// Running on the preferred mode
    Normal,
    /// Running on a fallback mode
    Degraded,
    /// No mode is available
    Failed,
    /// Returning to the preferred mode
    Recovering,
}

/// Configuration for graceful degradation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Switch modes automatically on fallback-worthy errors
    pub enable_auto_fallback: bool,
    /// Run the health monitor and return to the preferred mode when possible
    pub enable_auto_recovery: bool,
    /// Fallback switches allowed before errors are ignored
    pub max_fallback_attempts: u32,
    /// Interval between health monitor probes
    #[serde(with = "crate::config::duration_ms")]
    pub health_check_interval: Duration,
    /// Whether Offline counts as an available mode
    pub allow_offline_mode: bool,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enable_auto_fallback: true,
            enable_auto_recovery: true,
            max_fallback_attempts: 2,
            health_check_interval: Duration::from_secs(10),
            allow_offline_mode: true,
        }
    }
}

impl DegradationConfig {
    /// Enable or disable automatic fallback
    #[must_use]
    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.enable_auto_fallback = enabled;
        self
    }

    /// Enable or disable automatic recovery
    #[must_use]
    pub fn with_auto_recovery(mut self, enabled: bool) -> Self {
        self.enable_auto_recovery = enabled;
        self
    }

    /// Set the fallback limit
    #[must_use]
    pub fn with_max_fallback_attempts(mut self, attempts: u32) -> Self {
        self.max_fallback_attempts = attempts;
        self
    }

    /// Set the health check interval
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Allow or forbid falling back to Offline
    #[must_use]
    pub fn with_offline_mode(mut self, allowed: bool) -> Self {
        self.allow_offline_mode = allowed;
        self
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval.is_zero() {
            return Err(ResilienceError::InvalidConfiguration(
                "health_check_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A multiplayer backend the manager can switch to.
///
/// Implementations must not call back into the degradation manager from these
/// methods.
pub trait MultiplayerBackend: Send + Sync {
    /// Whether the backend can serve a session right now
    fn is_available(&self) -> bool;

    /// Active health probe used by the health monitor
    fn check_health(&self) -> bool {
        self.is_available()
    }
}

/// Health-check record of one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendHealthMetrics {
    /// Probes performed
    pub total_checks: u64,
    /// Probes that reported unhealthy
    pub failed_checks: u64,
    /// Share of healthy probes, in percent
    pub uptime_percentage: f64,
    /// Running average of probe duration
    pub average_response_time: Duration,
    /// Result of the last probe
    pub last_healthy: bool,
    /// Time of the last probe
    pub last_check: Option<DateTime<Utc>>,
}

impl BackendHealthMetrics {
    #[allow(clippy::arithmetic_side_effects, clippy::cast_precision_loss)]
    fn record(&mut self, healthy: bool, elapsed: Duration) {
        self.total_checks = self.total_checks.saturating_add(1);
        if !healthy {
            self.failed_checks = self.failed_checks.saturating_add(1);
        }
        let total = self.total_checks as f64;
        let healthy_checks = self.total_checks.saturating_sub(self.failed_checks) as f64;
        self.uptime_percentage = healthy_checks / total * 100.0;

        let avg = self.average_response_time.as_secs_f64();
        let sample = elapsed.as_secs_f64();
        let next = if self.total_checks == 1 { sample } else { avg + (sample - avg) / total };
        self.average_response_time = Duration::from_secs_f64(next.max(0.0));
        self.last_healthy = healthy;
        self.last_check = Some(Utc::now());
    }
}

/// Snapshot of the degradation manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationStatus {
    /// Current state
    pub state: DegradationState,
    /// Active mode
    pub current_mode: MultiplayerMode,
    /// Preferred mode chosen at initialization
    pub original_mode: MultiplayerMode,
    /// Fallback switches since the last return to the preferred mode
    pub fallback_attempts: u32,
    /// Time spent degraded, if degraded
    pub degraded_for: Option<Duration>,
}

/// Observer of mode switches: `(from, to, new_state)`
pub type ModeChangeListener =
    Arc<dyn Fn(MultiplayerMode, MultiplayerMode, DegradationState) + Send + Sync>;

struct DegradationInternalState {
    config: DegradationConfig,
    initialized: bool,
    state: DegradationState,
    current_mode: MultiplayerMode,
    original_mode: MultiplayerMode,
    fallback_attempts: u32,
    degradation_started: Option<Instant>,
    backends: HashMap<MultiplayerMode, Weak<dyn MultiplayerBackend>>,
    health: HashMap<MultiplayerMode, BackendHealthMetrics>,
    // Set while a monitor thread is committed to running; cleared by that
    // thread under this lock when it decides to exit.
    monitor_running: bool,
}

impl DegradationInternalState {
    fn backend(&self, mode: MultiplayerMode) -> Option<Arc<dyn MultiplayerBackend>> {
        self.backends.get(&mode).and_then(Weak::upgrade)
    }

    /// The single availability check used by every decision.
    fn is_available(&self, mode: MultiplayerMode) -> bool {
        if mode == MultiplayerMode::Offline {
            return self.config.allow_offline_mode;
        }
        self.backend(mode).is_some_and(|backend| {
            catch_unwind(AssertUnwindSafe(|| backend.is_available())).unwrap_or(false)
        })
    }

    fn switch_to(&mut self, mode: MultiplayerMode) {
        self.current_mode = mode;
        if mode == self.original_mode {
            self.state = DegradationState::Normal;
            self.degradation_started = None;
        } else {
            self.state = DegradationState::Degraded;
            self.degradation_started = Some(Instant::now());
        }
    }
}

struct ModeChange {
    from: MultiplayerMode,
    to: MultiplayerMode,
    state: DegradationState,
}

struct DegradationShared {
    internal_state: Mutex<DegradationInternalState>,
    stop: StopSignal,
    listener: RwLock<Option<ModeChangeListener>>,
}

impl DegradationShared {
    fn lock(&self) -> MutexGuard<'_, DegradationInternalState> {
        self.internal_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: &ModeChange) {
        let listener =
            self.listener.read().unwrap_or_else(PoisonError::into_inner).as_ref().map(Arc::clone);
        if let Some(listener) = listener {
            listener(change.from, change.to, change.state);
        }
    }

    fn handle_error(&self, error: &ErrorInfo) -> Result<Option<MultiplayerMode>> {
        if !is_fallback_worthy(error.code) {
            return Ok(None);
        }

        let change = {
            let mut internal_state = self.lock();
            if !internal_state.initialized || !internal_state.config.enable_auto_fallback {
                return Ok(None);
            }
            if internal_state.fallback_attempts >= internal_state.config.max_fallback_attempts {
                warn!(
                    code = error.code,
                    attempts = internal_state.fallback_attempts,
                    "Fallback limit reached, ignoring error"
                );
                return Ok(None);
            }

            let from = internal_state.current_mode;
            let Some(next) =
                from.fallback_modes().iter().copied().find(|mode| internal_state.is_available(*mode))
            else {
                error!(mode = %from, code = error.code, "No fallback mode available");
                return Err(ResilienceError::ServiceUnavailable(format!(
                    "no fallback available from {from}"
                )));
            };

            internal_state.switch_to(next);
            internal_state.fallback_attempts = internal_state.fallback_attempts.saturating_add(1);
            ModeChange { from, to: next, state: internal_state.state }
        };

        warn!(
            from = %change.from,
            to = %change.to,
            code = error.code,
            component = %error.component,
            "Multiplayer mode degraded"
        );
        self.notify(&change);
        Ok(Some(change.to))
    }

    fn attempt_recovery(&self, target: MultiplayerMode) -> Result<()> {
        let change = {
            let mut internal_state = self.lock();
            if !internal_state.initialized {
                return Err(ResilienceError::InvalidState(
                    "degradation manager is not initialized".to_string(),
                ));
            }
            if !internal_state.is_available(target) {
                return Err(ResilienceError::ServiceUnavailable(format!("{target} is not available")));
            }

            let from = internal_state.current_mode;
            let previous_state = internal_state.state;
            if target == internal_state.original_mode {
                internal_state.fallback_attempts = 0;
            }
            if target == from && previous_state == DegradationState::Degraded {
                // Keep the original degradation start
                internal_state.current_mode = target;
            } else {
                internal_state.switch_to(target);
            }
            let state = internal_state.state;
            (from != target || previous_state != state).then_some(ModeChange { from, to: target, state })
        };

        if let Some(change) = change {
            info!(from = %change.from, to = %change.to, state = ?change.state, "Multiplayer mode recovered");
            self.notify(&change);
        }
        Ok(())
    }

    fn check_backend_health(&self, mode: MultiplayerMode) -> bool {
        let backend = {
            let internal_state = self.lock();
            if mode == MultiplayerMode::Offline {
                return internal_state.config.allow_offline_mode;
            }
            internal_state.backend(mode)
        };

        let started = Instant::now();
        let healthy = backend.is_some_and(|backend| {
            catch_unwind(AssertUnwindSafe(|| backend.check_health())).unwrap_or(false)
        });
        let elapsed = started.elapsed();

        self.lock().health.entry(mode).or_default().record(healthy, elapsed);
        debug!(mode = %mode, healthy, elapsed_ms = elapsed.as_millis(), "Backend health checked");
        healthy
    }

    fn try_auto_recover(&self) {
        let (original, previous_state) = {
            let mut internal_state = self.lock();
            let stranded = internal_state.current_mode != internal_state.original_mode
                || internal_state.state == DegradationState::Failed;
            let healthy = internal_state
                .health
                .get(&internal_state.original_mode)
                .is_some_and(|metrics| metrics.last_healthy);
            if !internal_state.initialized
                || !internal_state.config.enable_auto_recovery
                || !stranded
                || !healthy
            {
                return;
            }
            let previous_state = internal_state.state;
            internal_state.state = DegradationState::Recovering;
            (internal_state.original_mode, previous_state)
        };

        info!(mode = %original, "Preferred mode healthy again, recovering");
        if let Err(err) = self.attempt_recovery(original) {
            warn!(mode = %original, error = %err, "Automatic recovery failed");
            let mut internal_state = self.lock();
            if internal_state.state == DegradationState::Recovering {
                internal_state.state = previous_state;
            }
        }
    }

    fn run_health_monitor(&self) {
        loop {
            let interval = {
                let mut internal_state = self.lock();
                if !internal_state.config.enable_auto_recovery {
                    internal_state.monitor_running = false;
                    debug!("Auto recovery disabled, health monitor exiting");
                    return;
                }
                internal_state.config.health_check_interval
            };
            if self.stop.wait(interval) {
                self.lock().monitor_running = false;
                return;
            }

            let registered: Vec<MultiplayerMode> = {
                let internal_state = self.lock();
                MultiplayerMode::networked()
                    .iter()
                    .copied()
                    .filter(|mode| internal_state.backends.contains_key(mode))
                    .collect()
            };
            for mode in registered {
                self.check_backend_health(mode);
            }
            self.try_auto_recover();
        }
    }
}

/// Switches multiplayer modes on failure and back on recovery
pub struct GracefulDegradationManager {
    shared: Arc<DegradationShared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GracefulDegradationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulDegradationManager {
    /// Create a manager with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DegradationConfig::default())
    }

    /// Create a manager with custom configuration
    #[must_use]
    pub fn with_config(config: DegradationConfig) -> Self {
        Self {
            shared: Arc::new(DegradationShared {
                internal_state: Mutex::new(DegradationInternalState {
                    config,
                    initialized: false,
                    state: DegradationState::Normal,
                    current_mode: MultiplayerMode::Internet,
                    original_mode: MultiplayerMode::Internet,
                    fallback_attempts: 0,
                    degradation_started: None,
                    backends: HashMap::new(),
                    health: HashMap::new(),
                    monitor_running: false,
                }),
                stop: StopSignal::new(),
                listener: RwLock::new(None),
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Register the backend serving `mode`.
    ///
    /// Only a weak handle is kept; a dropped backend reads as unavailable.
    pub fn register_backend(&self, mode: MultiplayerMode, backend: &Arc<dyn MultiplayerBackend>) {
        self.shared.lock().backends.insert(mode, Arc::downgrade(backend));
        debug!(mode = %mode, "Backend registered");
    }

    /// Select `primary` as the preferred mode, falling back if it is unavailable.
    ///
    /// Starts the health monitor when auto recovery is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::ServiceUnavailable`] and enters
    /// [`DegradationState::Failed`] when neither the primary nor any fallback
    /// mode is available.
    pub fn initialize(&self, primary: MultiplayerMode) -> Result<()> {
        let (result, change, auto_recovery) = {
            let mut internal_state = self.shared.lock();
            let from = internal_state.current_mode;
            internal_state.initialized = true;
            internal_state.original_mode = primary;
            internal_state.fallback_attempts = 0;
            internal_state.switch_to(primary);

            let result = if internal_state.is_available(primary) {
                info!(mode = %primary, "Multiplayer initialized");
                Ok(())
            } else if let Some(fallback) = primary
                .fallback_modes()
                .iter()
                .copied()
                .find(|mode| internal_state.is_available(*mode))
            {
                internal_state.switch_to(fallback);
                warn!(primary = %primary, fallback = %fallback, "Primary mode unavailable, starting degraded");
                Ok(())
            } else {
                internal_state.state = DegradationState::Failed;
                error!(primary = %primary, "No multiplayer mode available");
                Err(ResilienceError::ServiceUnavailable(format!(
                    "neither {primary} nor any fallback is available"
                )))
            };

            let change = ModeChange {
                from,
                to: internal_state.current_mode,
                state: internal_state.state,
            };
            (result, change, internal_state.config.enable_auto_recovery)
        };

        self.shared.notify(&change);
        if auto_recovery {
            self.start_health_monitor()?;
        }
        result
    }

    /// React to a reported error by switching to the first available fallback.
    ///
    /// Returns `Ok(Some(mode))` after a switch and `Ok(None)` when the error is
    /// ignored: not fallback-worthy, auto fallback disabled, fallback limit
    /// reached, or the manager is not initialized.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::ServiceUnavailable`] when no fallback is
    /// available; the current mode is left unchanged.
    pub fn handle_error(&self, error: &ErrorInfo) -> Result<Option<MultiplayerMode>> {
        self.shared.handle_error(error)
    }

    /// Switch to `target`. Reaching the preferred mode restores `Normal` and
    /// clears the fallback count.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::ServiceUnavailable`] if `target` is not
    /// available and [`ResilienceError::InvalidState`] before `initialize`.
    pub fn attempt_recovery(&self, target: MultiplayerMode) -> Result<()> {
        self.shared.attempt_recovery(target)
    }

    /// Probe one backend and record the result in its health metrics
    pub fn check_backend_health(&self, mode: MultiplayerMode) -> bool {
        self.shared.check_backend_health(mode)
    }

    /// Whether `mode` is available right now
    #[must_use]
    pub fn is_mode_available(&self, mode: MultiplayerMode) -> bool {
        self.shared.lock().is_available(mode)
    }

    /// Health metrics recorded for `mode`
    #[must_use]
    pub fn health_metrics(&self, mode: MultiplayerMode) -> Option<BackendHealthMetrics> {
        self.shared.lock().health.get(&mode).cloned()
    }

    /// Active mode
    #[must_use]
    pub fn current_mode(&self) -> MultiplayerMode {
        self.shared.lock().current_mode
    }

    /// Preferred mode
    #[must_use]
    pub fn original_mode(&self) -> MultiplayerMode {
        self.shared.lock().original_mode
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DegradationState {
        self.shared.lock().state
    }

    /// Whether the active mode differs from the preferred one
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        let internal_state = self.shared.lock();
        internal_state.current_mode != internal_state.original_mode
    }

    /// Snapshot of modes, state and fallback count
    #[must_use]
    pub fn status(&self) -> DegradationStatus {
        let internal_state = self.shared.lock();
        DegradationStatus {
            state: internal_state.state,
            current_mode: internal_state.current_mode,
            original_mode: internal_state.original_mode,
            fallback_attempts: internal_state.fallback_attempts,
            degraded_for: internal_state.degradation_started.map(|started| started.elapsed()),
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> DegradationConfig {
        self.shared.lock().config.clone()
    }

    /// Replace the configuration.
    ///
    /// Starts the health monitor if auto recovery became enabled after
    /// initialization; a disabled monitor exits at its next iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation or the monitor
    /// thread cannot be spawned.
    pub fn update_config(&self, config: DegradationConfig) -> Result<()> {
        config.validate()?;
        let (initialized, auto_recovery) = {
            let mut internal_state = self.shared.lock();
            let flags = (internal_state.initialized, config.enable_auto_recovery);
            internal_state.config = config;
            flags
        };
        if initialized && auto_recovery {
            self.start_health_monitor()?;
        }
        Ok(())
    }

    /// Install or clear the mode-change listener
    pub fn set_mode_change_listener(&self, listener: Option<ModeChangeListener>) {
        *self.shared.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Listener for a [`CircuitBreaker`](super::circuit_breaker::CircuitBreaker)
    /// that reports an opening breaker as a `ServiceUnavailable` error.
    ///
    /// The listener holds a weak reference and does nothing once the manager
    /// is dropped.
    #[must_use]
    pub fn circuit_breaker_listener(&self) -> StateChangeListener {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |name: &str, _from: CircuitBreakerState, to: CircuitBreakerState| {
            if to != CircuitBreakerState::Open {
                return;
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let info = ErrorInfo::new(
                ErrorCode::ServiceUnavailable,
                format!("Circuit breaker '{name}' opened"),
                "CircuitBreaker",
            );
            if let Err(err) = shared.handle_error(&info) {
                warn!(breaker = %name, error = %err, "Breaker opened with no fallback available");
            }
        })
    }

    /// Stop the health monitor and join it
    pub fn shutdown(&self) {
        self.shared.stop.stop();
        let handle = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Health monitor thread panicked");
        }
    }

    fn start_health_monitor(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut internal_state = self.shared.lock();
            if internal_state.monitor_running {
                return Ok(());
            }
            internal_state.monitor_running = true;
        }
        // The previous monitor, if any, has committed to exiting
        if let Some(previous) = monitor.take() {
            let _ = previous.join();
        }
        self.shared.stop.reset();

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("health-monitor".to_string())
            .spawn(move || shared.run_health_monitor());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.lock().monitor_running = false;
                return Err(ResilienceError::from(err));
            }
        };
        *monitor = Some(handle);
        debug!("Health monitor started");
        Ok(())
    }
}

impl Drop for GracefulDegradationManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
