//! Error Recovery Module
//!
//! This module provides the fault-tolerance core of the multiplayer stack:
//! circuit breakers, connection recovery with backoff, graceful degradation
//! between multiplayer modes and the central error handler.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

/// Circuit breaker for failing remote services.
pub mod circuit_breaker;
/// Exponential-backoff connection recovery.
pub mod connection_recovery;
/// Core error record and notification types.
pub mod core;
/// Graceful degradation between multiplayer modes.
pub mod degradation;
/// Central error handler.
pub mod handler;
/// Pluggable recovery strategies.
pub mod recovery;

mod signal;
mod workers;

// Re-exports for convenient access
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
    StateChangeListener,
};
pub use connection_recovery::{
    ConnectionRecoveryManager, RecoverableConnection, RecoveryConfig, RecoveryListener,
    RecoveryState, RecoveryStatus, calculate_backoff_delay, calculate_jittered_delay,
};
pub use core::{ErrorInfo, Notification, NotificationLevel};
pub use degradation::{
    BackendHealthMetrics, DegradationConfig, DegradationState, DegradationStatus,
    GracefulDegradationManager, ModeChangeListener, MultiplayerBackend, MultiplayerMode,
};
pub use handler::{
    ErrorCallback, ErrorHandler, ErrorHandlerConfig, ErrorStatistics, NotificationCallback,
    RecoveryCallback,
};
pub use recovery::{
    FallbackModeStrategy, ModeSwitch, NetworkRetryStrategy, PermissionPrompt,
    PermissionRequestStrategy, RecoveryCompletion, RecoveryStrategy, RetryAction,
};
