//! Error Handling Module
//!
//! This module provides the error taxonomy and the recovery machinery of the
//! netplay resilience core.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

/// Circuit breaking, connection recovery, degradation and error handling.
pub mod error_recovery;
/// Error codes, categories and the crate error type.
pub mod types;

// Re-export error types and recovery mechanisms
pub use error_recovery::{ErrorHandler, ErrorInfo, NotificationLevel};
pub use types::{
    ErrorCategory, ErrorClassifier, ErrorCode, ResilienceError, Result, get_default_message,
    get_error_category, is_fallback_worthy, is_retryable_code,
};
