//! Error Handler
//!
//! Central entry point for multiplayer errors: classifies and enriches each
//! report, keeps a bounded history with statistics, raises UI notifications
//! and dispatches recovery strategies.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::core::{ErrorInfo, Notification, NotificationLevel};
use super::recovery::{RecoveryCompletion, RecoveryStrategy};
use crate::error::types::classification::builtin_classifier;
use crate::error::types::{ErrorCategory, ErrorClassifier, ResilienceError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Error handler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlerConfig {
    /// Errors kept in history before the oldest is evicted
    pub max_error_history: usize,
    /// Run recovery strategies automatically on report
    pub auto_recovery_enabled: bool,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self { max_error_history: 100, auto_recovery_enabled: true }
    }
}

impl ErrorHandlerConfig {
    /// Set the history bound
    #[must_use]
    pub fn with_max_error_history(mut self, max: usize) -> Self {
        self.max_error_history = max;
        self
    }

    /// Enable or disable automatic recovery
    #[must_use]
    pub fn with_auto_recovery(mut self, enabled: bool) -> Self {
        self.auto_recovery_enabled = enabled;
        self
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the history bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_error_history == 0 {
            return Err(ResilienceError::InvalidConfiguration(
                "max_error_history must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Error statistics tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Total number of errors reported.
    pub total_errors: usize,
    /// Error counts by code.
    pub errors_by_code: HashMap<u32, usize>,
    /// Error counts by category.
    pub errors_by_category: HashMap<ErrorCategory, usize>,
    /// Recovery strategies started.
    pub recovery_attempts: usize,
    /// Recoveries that completed successfully.
    pub successful_recoveries: usize,
    /// Recoveries that completed unsuccessfully.
    pub failed_recoveries: usize,
    /// Timestamp of the last reported error.
    pub last_error_time: Option<DateTime<Utc>>,
}

impl ErrorStatistics {
    #[allow(clippy::arithmetic_side_effects)]
    fn record_error(&mut self, error: &ErrorInfo) {
        self.total_errors += 1;
        *self.errors_by_code.entry(error.code).or_insert(0) += 1;
        *self.errors_by_category.entry(error.category).or_insert(0) += 1;
        self.last_error_time = Some(error.timestamp);
    }

    /// Calculate the recovery success rate.
    ///
    /// Returns the ratio of successful recoveries to recovery attempts, or
    /// 0.0 if no recovery has been attempted.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn recovery_rate(&self) -> f64 {
        if self.recovery_attempts == 0 {
            0.0
        } else {
            self.successful_recoveries as f64 / self.recovery_attempts as f64
        }
    }
}

/// Observer of accepted errors
pub type ErrorCallback = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;
/// Observer of UI notifications
pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;
/// Observer of finished recoveries
pub type RecoveryCallback = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    error: Option<ErrorCallback>,
    notification: Option<NotificationCallback>,
    recovery_success: Option<RecoveryCallback>,
    recovery_failure: Option<RecoveryCallback>,
}

#[derive(Default)]
struct ErrorHandlerState {
    config: ErrorHandlerConfig,
    history: VecDeque<ErrorInfo>,
    statistics: ErrorStatistics,
    contexts: HashMap<u32, HashMap<String, String>>,
    retry_delays: HashMap<u32, Duration>,
    suggested_actions: HashMap<u32, Vec<String>>,
    notification_levels: HashMap<u32, NotificationLevel>,
    strategies: HashMap<ErrorCategory, Vec<Arc<dyn RecoveryStrategy>>>,
}

impl ErrorHandlerState {
    fn enrich(&self, error: &mut ErrorInfo) {
        if let Some(context) = self.contexts.get(&error.code) {
            for (key, value) in context {
                error.context.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        if error.retry_after.is_none() {
            error.retry_after = self.retry_delays.get(&error.code).copied();
        }
        if let Some(actions) = self.suggested_actions.get(&error.code) {
            for action in actions {
                if !error.suggested_actions.contains(action) {
                    error.suggested_actions.push(action.clone());
                }
            }
        }
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.config.max_error_history {
            self.history.pop_front();
        }
    }
}

struct HandlerShared {
    state: Mutex<ErrorHandlerState>,
    callbacks: RwLock<Callbacks>,
}

impl HandlerShared {
    fn finish_recovery(&self, error: &ErrorInfo, recovered: bool) {
        {
            let mut state = self.state.lock();
            if recovered {
                state.statistics.successful_recoveries =
                    state.statistics.successful_recoveries.saturating_add(1);
            } else {
                state.statistics.failed_recoveries =
                    state.statistics.failed_recoveries.saturating_add(1);
            }
        }

        let callbacks = self.callbacks.read().clone();
        if recovered {
            info!(code = error.code, component = %error.component, "Recovery succeeded");
            if let Some(callback) = callbacks.recovery_success {
                callback(error);
            }
        } else {
            warn!(code = error.code, component = %error.component, "Recovery failed");
            if let Some(callback) = callbacks.recovery_failure {
                callback(error);
            }
        }
    }
}

/// Classifies, records and recovers from multiplayer errors.
///
/// Construct one per process and share it as `Arc<ErrorHandler>`.
pub struct ErrorHandler {
    shared: Arc<HandlerShared>,
    classifier: ErrorClassifier,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    /// Create a handler with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ErrorHandlerConfig::default())
    }

    /// Create a handler with custom configuration
    #[must_use]
    pub fn with_config(config: ErrorHandlerConfig) -> Self {
        Self::with_classifier(config, builtin_classifier().clone())
    }

    /// Create a handler using a custom classifier
    #[must_use]
    pub fn with_classifier(config: ErrorHandlerConfig, classifier: ErrorClassifier) -> Self {
        Self {
            shared: Arc::new(HandlerShared {
                state: Mutex::new(ErrorHandlerState { config, ..ErrorHandlerState::default() }),
                callbacks: RwLock::new(Callbacks::default()),
            }),
            classifier,
        }
    }

    /// Report an error by code. An empty message is replaced with the code's
    /// default message.
    pub fn report_error(
        &self,
        code: impl Into<u32>,
        message: impl Into<String>,
        component: impl Into<String>,
    ) -> ErrorInfo {
        let info =
            ErrorInfo::classified(&self.classifier, code.into(), message.into(), component.into());
        self.report_error_info(info)
    }

    /// Report a prepared error record and return it as accepted into history.
    pub fn report_error_info(&self, mut error: ErrorInfo) -> ErrorInfo {
        if error.message.is_empty() {
            error.message = self.classifier.default_message(error.code);
        }

        let (notification, auto_recovery) = {
            let mut state = self.shared.state.lock();
            state.enrich(&mut error);
            state.history.push_back(error.clone());
            state.trim_history();
            state.statistics.record_error(&error);

            let level = state
                .notification_levels
                .get(&error.code)
                .copied()
                .unwrap_or_else(|| NotificationLevel::for_category(error.category));
            (Notification::for_error(&error, level), state.config.auto_recovery_enabled)
        };

        match notification.level {
            NotificationLevel::Critical | NotificationLevel::Error => error!(
                code = error.code,
                category = %error.category,
                component = %error.component,
                message = %error.message,
                "Multiplayer error reported"
            ),
            NotificationLevel::Warning => warn!(
                code = error.code,
                category = %error.category,
                component = %error.component,
                message = %error.message,
                "Multiplayer error reported"
            ),
            NotificationLevel::Info => info!(
                code = error.code,
                category = %error.category,
                component = %error.component,
                "Multiplayer error reported"
            ),
        }

        let callbacks = self.shared.callbacks.read().clone();
        if let Some(callback) = callbacks.error {
            callback(&error);
        }
        if let Some(callback) = callbacks.notification {
            callback(&notification);
        }

        if auto_recovery {
            self.attempt_recovery(&error);
        }
        error
    }

    /// Run the first registered strategy of the error's category that can
    /// recover it. Returns `false` when no strategy applies.
    pub fn attempt_recovery(&self, error: &ErrorInfo) -> bool {
        let candidates = self.shared.state.lock().strategies.get(&error.category).cloned();
        let Some(strategy) =
            candidates.and_then(|list| list.into_iter().find(|strategy| strategy.can_recover(error)))
        else {
            debug!(code = error.code, category = %error.category, "No recovery strategy applies");
            return false;
        };

        {
            let mut state = self.shared.state.lock();
            state.statistics.recovery_attempts = state.statistics.recovery_attempts.saturating_add(1);
        }
        info!(code = error.code, strategy = strategy.name(), "Starting recovery");

        let shared: Weak<HandlerShared> = Arc::downgrade(&self.shared);
        let recovered_error = error.clone();
        let completion: RecoveryCompletion = Box::new(move |recovered| {
            if let Some(shared) = shared.upgrade() {
                shared.finish_recovery(&recovered_error, recovered);
            }
        });
        strategy.attempt_recovery(error.clone(), completion);
        true
    }

    /// Append a strategy to the category's list; earlier registrations win
    pub fn register_recovery_strategy(
        &self,
        category: ErrorCategory,
        strategy: Arc<dyn RecoveryStrategy>,
    ) {
        debug!(category = %category, strategy = strategy.name(), "Recovery strategy registered");
        self.shared.state.lock().strategies.entry(category).or_default().push(strategy);
    }

    /// Attach a context entry to every future report of `code`
    pub fn set_error_context(
        &self,
        code: impl Into<u32>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.shared
            .state
            .lock()
            .contexts
            .entry(code.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Attach a retry-after hint to every future report of `code`
    pub fn set_retry_delay(&self, code: impl Into<u32>, delay: Duration) {
        self.shared.state.lock().retry_delays.insert(code.into(), delay);
    }

    /// Attach a suggested action to every future report of `code`
    pub fn add_suggested_action(&self, code: impl Into<u32>, action: impl Into<String>) {
        let action = action.into();
        let mut state = self.shared.state.lock();
        let actions = state.suggested_actions.entry(code.into()).or_default();
        if !actions.contains(&action) {
            actions.push(action);
        }
    }

    /// Override the notification level for `code`
    pub fn set_notification_level(&self, code: impl Into<u32>, level: NotificationLevel) {
        self.shared.state.lock().notification_levels.insert(code.into(), level);
    }

    /// Drop all enrichment registered for `code`
    pub fn clear_error_context(&self, code: impl Into<u32>) {
        let code = code.into();
        let mut state = self.shared.state.lock();
        state.contexts.remove(&code);
        state.retry_delays.remove(&code);
        state.suggested_actions.remove(&code);
        state.notification_levels.remove(&code);
    }

    /// Install or clear the error callback
    pub fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        self.shared.callbacks.write().error = callback;
    }

    /// Install or clear the notification callback
    pub fn set_notification_callback(&self, callback: Option<NotificationCallback>) {
        self.shared.callbacks.write().notification = callback;
    }

    /// Install or clear the recovery-success callback
    pub fn set_recovery_success_callback(&self, callback: Option<RecoveryCallback>) {
        self.shared.callbacks.write().recovery_success = callback;
    }

    /// Install or clear the recovery-failure callback
    pub fn set_recovery_failure_callback(&self, callback: Option<RecoveryCallback>) {
        self.shared.callbacks.write().recovery_failure = callback;
    }

    /// Errors in history, oldest first
    #[must_use]
    pub fn error_history(&self) -> Vec<ErrorInfo> {
        self.shared.state.lock().history.iter().cloned().collect()
    }

    /// Snapshot of the statistics
    #[must_use]
    pub fn error_statistics(&self) -> ErrorStatistics {
        self.shared.state.lock().statistics.clone()
    }

    /// Clear history and statistics
    pub fn clear_history(&self) {
        let mut state = self.shared.state.lock();
        state.history.clear();
        state.statistics = ErrorStatistics::default();
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> ErrorHandlerConfig {
        self.shared.state.lock().config.clone()
    }

    /// Replace the configuration, trimming history to the new bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn update_config(&self, config: ErrorHandlerConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.shared.state.lock();
        state.config = config;
        state.trim_history();
        Ok(())
    }

    /// Release every registered strategy, joining their workers
    pub fn shutdown(&self) {
        let strategies = std::mem::take(&mut self.shared.state.lock().strategies);
        let count: usize = strategies.values().map(Vec::len).sum();
        drop(strategies);
        info!(strategies = count, "Error handler shut down");
    }
}
