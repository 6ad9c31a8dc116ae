//! Error Type Conversions
//!
//! `From` implementations for converting external error types into
//! `ResilienceError`, enabling error propagation with the `?` operator.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::ResilienceError;
use std::any::Any;

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        ResilienceError::Internal(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Serialization(format!("JSON error: {err}"))
    }
}

impl From<tokio::task::JoinError> for ResilienceError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ResilienceError::Aborted(format!("Task cancelled: {err}"))
        } else {
            ResilienceError::Internal(format!("Task panicked: {err}"))
        }
    }
}

/// Convert a caught panic payload into an internal error.
///
/// Panic payloads are `Box<dyn Any>`, so the common `&str` and `String`
/// payloads are downcast before falling back to a generic message.
pub(crate) fn panic_to_error(payload: &(dyn Any + Send)) -> ResilienceError {
    let msg = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Unknown panic payload".to_string());
    ResilienceError::Internal(format!("Operation panicked: {msg}"))
}
