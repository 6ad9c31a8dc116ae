//! Netplay Resilience
//!
//! Fault-tolerance core of an emulator's multiplayer stack. It keeps room,
//! relay and local-mesh connections usable when the network misbehaves.
//!
//! # Key Components
//!
//! - **CircuitBreaker**: stops calling a failing service until it had time to recover
//! - **ConnectionRecoveryManager**: reconnects in the background with exponential backoff
//! - **GracefulDegradationManager**: falls back from Internet to local mesh to offline play
//! - **ErrorHandler**: classifies errors, notifies the UI and runs recovery strategies
//!
//! # Example
//!
//! ```rust
//! use netplay_resilience::{CircuitBreaker, ErrorCode, ResilienceError};
//!
//! let breaker = CircuitBreaker::new("room-server");
//! let result: Result<u32, ResilienceError> = breaker.execute(|| {
//!     Err(ResilienceError::operation(ErrorCode::NetworkTimeout, "no reply"))
//! });
//! assert!(result.is_err());
//! assert_eq!(breaker.metrics().failed_requests, 1);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

/// Configuration types and JSON loading.
pub mod config;
/// Error taxonomy and recovery machinery.
pub mod error;
/// Tracing subscriber setup.
pub mod logging;

pub use config::ResilienceConfig;
pub use error::error_recovery::{
    BackendHealthMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitBreakerState, ConnectionRecoveryManager, DegradationConfig, DegradationState,
    DegradationStatus, ErrorHandler, ErrorHandlerConfig, ErrorInfo, ErrorStatistics,
    FallbackModeStrategy, GracefulDegradationManager, MultiplayerBackend, MultiplayerMode,
    NetworkRetryStrategy, Notification, NotificationLevel, PermissionRequestStrategy,
    RecoverableConnection, RecoveryCompletion, RecoveryConfig, RecoveryState, RecoveryStatus,
    RecoveryStrategy, calculate_backoff_delay,
};
pub use error::types::{
    ErrorCategory, ErrorClassifier, ErrorCode, ResilienceError, Result, get_default_message,
    get_error_category, is_fallback_worthy, is_retryable_code,
};
