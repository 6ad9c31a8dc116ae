//! Error Classification
//!
//! Table-driven mapping from numeric error codes to categories and default
//! user-facing messages. Classification is total: codes outside every
//! registered range fall into [`ErrorCategory::Unknown`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use super::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::OnceLock;

/// Error category used to pick notifications and recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Connectivity to peers, relays or the room server
    NetworkConnectivity,
    /// User or OS denied an operation
    PermissionDenied,
    /// Invalid settings or parameters
    ConfigurationError,
    /// Incompatible or malformed protocol traffic
    ProtocolMismatch,
    /// Rooms, rate limits or memory exhausted
    ResourceExhausted,
    /// Security policy violations
    SecurityViolation,
    /// Device cannot support the requested mode
    HardwareLimitation,
    /// Anything unclassified
    Unknown,
}

impl ErrorCategory {
    /// Message used when a code in this category has no message of its own
    #[must_use]
    pub fn fallback_message(self) -> &'static str {
        match self {
            ErrorCategory::NetworkConnectivity => "A network error occurred",
            ErrorCategory::PermissionDenied => "The operation was not permitted",
            ErrorCategory::ConfigurationError => "Multiplayer settings are invalid",
            ErrorCategory::ProtocolMismatch => "Communication with the peer failed",
            ErrorCategory::ResourceExhausted => "Not enough resources to continue",
            ErrorCategory::SecurityViolation => "A security problem was detected",
            ErrorCategory::HardwareLimitation => "This device does not support the operation",
            ErrorCategory::Unknown => "An unknown error occurred",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::NetworkConnectivity => "NetworkConnectivity",
            ErrorCategory::PermissionDenied => "PermissionDenied",
            ErrorCategory::ConfigurationError => "ConfigurationError",
            ErrorCategory::ProtocolMismatch => "ProtocolMismatch",
            ErrorCategory::ResourceExhausted => "ResourceExhausted",
            ErrorCategory::SecurityViolation => "SecurityViolation",
            ErrorCategory::HardwareLimitation => "HardwareLimitation",
            ErrorCategory::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Lookup tables mapping codes to categories and default messages.
///
/// Ranges are searched in registration order and the first match wins, so
/// ranges added with [`ErrorClassifier::with_category_range`] after the
/// defaults only apply to codes the defaults do not already cover.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    ranges: Vec<(RangeInclusive<u32>, ErrorCategory)>,
    messages: HashMap<u32, String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let ranges = vec![
            (1000..=1999, ErrorCategory::NetworkConnectivity),
            (2000..=2999, ErrorCategory::PermissionDenied),
            (3000..=3999, ErrorCategory::ConfigurationError),
            (4000..=4999, ErrorCategory::ProtocolMismatch),
            (5000..=5999, ErrorCategory::ResourceExhausted),
            (6000..=6999, ErrorCategory::SecurityViolation),
            (7000..=7999, ErrorCategory::HardwareLimitation),
        ];

        let messages = [
            (ErrorCode::NetworkTimeout, "Unable to connect to multiplayer service"),
            (ErrorCode::ConnectionLost, "Connection to the multiplayer session was lost"),
            (ErrorCode::HostUnreachable, "The remote host could not be reached"),
            (ErrorCode::ServiceUnavailable, "The multiplayer service is temporarily unavailable"),
            (ErrorCode::DnsResolutionFailed, "Could not resolve the multiplayer server address"),
            (ErrorCode::ConnectionRefused, "The multiplayer server refused the connection"),
            (ErrorCode::RelayDisconnected, "The relay server closed the connection"),
            (ErrorCode::PermissionDenied, "Permission denied"),
            (ErrorCode::AuthenticationFailed, "Authentication with the multiplayer service failed"),
            (ErrorCode::LocalNetworkAccessDenied, "Local network access is required for ad-hoc play"),
            (ErrorCode::InvalidParameter, "An invalid parameter was supplied"),
            (ErrorCode::InvalidConfiguration, "Multiplayer configuration is invalid"),
            (ErrorCode::InvalidState, "The operation is not allowed right now"),
            (ErrorCode::ProtocolVersionMismatch, "The other player uses an incompatible version"),
            (ErrorCode::MalformedMessage, "Received a malformed message"),
            (ErrorCode::UnexpectedResponse, "Received an unexpected response"),
            (ErrorCode::RoomFull, "The room is full"),
            (ErrorCode::RateLimited, "Too many requests, please wait"),
            (ErrorCode::OutOfMemory, "Not enough memory for multiplayer"),
            (ErrorCode::SecurityViolation, "Connection blocked for security reasons"),
            (ErrorCode::CertificateInvalid, "The server certificate is not trusted"),
            (ErrorCode::PacketRejected, "Traffic from the peer was rejected"),
            (ErrorCode::NotSupported, "This feature is not supported on this device"),
            (ErrorCode::AdapterUnavailable, "No wireless adapter is available"),
            (ErrorCode::Unknown, "An unknown error occurred"),
            (ErrorCode::InternalError, "An internal error occurred"),
            (ErrorCode::OperationAborted, "The operation was cancelled"),
        ]
        .into_iter()
        .map(|(code, message)| (code.code(), message.to_string()))
        .collect();

        Self { ranges, messages }
    }
}

impl ErrorClassifier {
    /// Create a classifier with the built-in tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional code range for a category
    #[must_use]
    pub fn with_category_range(mut self, range: RangeInclusive<u32>, category: ErrorCategory) -> Self {
        self.ranges.push((range, category));
        self
    }

    /// Register or replace the default message of a code
    #[must_use]
    pub fn with_message(mut self, code: u32, message: impl Into<String>) -> Self {
        self.messages.insert(code, message.into());
        self
    }

    /// Category of a numeric error code
    #[must_use]
    pub fn category(&self, code: u32) -> ErrorCategory {
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(&code))
            .map_or(ErrorCategory::Unknown, |(_, category)| *category)
    }

    /// Default human-readable message of a numeric error code
    #[must_use]
    pub fn default_message(&self, code: u32) -> String {
        self.messages
            .get(&code)
            .cloned()
            .unwrap_or_else(|| self.category(code).fallback_message().to_string())
    }
}

/// Shared instance of the built-in tables
pub(crate) fn builtin_classifier() -> &'static ErrorClassifier {
    static INSTANCE: OnceLock<ErrorClassifier> = OnceLock::new();
    INSTANCE.get_or_init(ErrorClassifier::new)
}

/// Category of an error code according to the built-in tables
#[must_use]
pub fn get_error_category(code: u32) -> ErrorCategory {
    builtin_classifier().category(code)
}

/// Default message of an error code according to the built-in tables
#[must_use]
pub fn get_default_message(code: u32) -> String {
    builtin_classifier().default_message(code)
}

/// Whether automatic retries make sense for this code.
///
/// Authentication, permission, unsupported-feature and bad-parameter failures
/// will fail identically on every retry.
#[must_use]
pub fn is_retryable_code(code: u32) -> bool {
    !matches!(
        ErrorCode::from_code(code),
        Some(
            ErrorCode::AuthenticationFailed
                | ErrorCode::NotSupported
                | ErrorCode::PermissionDenied
                | ErrorCode::InvalidParameter
        )
    )
}

/// Whether this code should make the degradation manager switch backends
#[must_use]
pub fn is_fallback_worthy(code: u32) -> bool {
    matches!(
        ErrorCode::from_code(code),
        Some(
            ErrorCode::NetworkTimeout
                | ErrorCode::ConnectionLost
                | ErrorCode::HostUnreachable
                | ErrorCode::ServiceUnavailable
        )
    )
}
