//! Core Error Types for Netplay Resilience
//!
//! This module defines the error codes shared by every multiplayer component
//! and the error type returned by the resilience core itself.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classification tables and default messages.
pub mod classification;
/// Error type conversion implementations.
pub mod conversions;

/// Result type alias for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Shared, versioned multiplayer error codes.
///
/// Room, relay and discovery clients report these as plain `u32` values so
/// codes unknown to this enum still flow through the system. Each thousand
/// block belongs to one [`classification::ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    // Network connectivity (1000-1999)
    /// Request to a remote peer or server timed out.
    NetworkTimeout = 1001,
    /// Established connection dropped.
    ConnectionLost = 1002,
    /// Remote host could not be reached.
    HostUnreachable = 1003,
    /// Service refused work or is temporarily down.
    ServiceUnavailable = 1004,
    /// Hostname of the room server could not be resolved.
    DnsResolutionFailed = 1005,
    /// Remote host actively refused the connection.
    ConnectionRefused = 1006,
    /// Relay server closed the tunnel.
    RelayDisconnected = 1007,

    // Permission (2000-2999)
    /// Operation is not permitted for this user.
    PermissionDenied = 2001,
    /// Credentials were rejected by the room server.
    AuthenticationFailed = 2002,
    /// OS denied access to the local network.
    LocalNetworkAccessDenied = 2003,

    // Configuration (3000-3999)
    /// A parameter passed to an operation is invalid.
    InvalidParameter = 3001,
    /// Multiplayer configuration is invalid.
    InvalidConfiguration = 3002,
    /// Operation is not valid in the current state.
    InvalidState = 3003,

    // Protocol (4000-4999)
    /// Peer or server speaks an incompatible protocol version.
    ProtocolVersionMismatch = 4001,
    /// Message could not be decoded.
    MalformedMessage = 4002,
    /// Response did not match the request.
    UnexpectedResponse = 4003,

    // Resources (5000-5999)
    /// Room has no free player slot.
    RoomFull = 5001,
    /// Server throttled the client.
    RateLimited = 5002,
    /// Local memory exhausted.
    OutOfMemory = 5003,

    // Security (6000-6999)
    /// Security policy violated.
    SecurityViolation = 6001,
    /// Server certificate failed validation.
    CertificateInvalid = 6002,
    /// Packet rejected by the filtering layer.
    PacketRejected = 6003,

    // Hardware (7000-7999)
    /// Feature is not supported on this device.
    NotSupported = 7001,
    /// Wireless adapter is missing or disabled.
    AdapterUnavailable = 7002,

    // Unclassified (9000+)
    /// Unknown failure.
    Unknown = 9000,
    /// Internal failure inside the resilience core.
    InternalError = 9001,
    /// Operation was cancelled before it completed.
    OperationAborted = 9002,
}

impl ErrorCode {
    const ALL: [ErrorCode; 27] = [
        ErrorCode::NetworkTimeout,
        ErrorCode::ConnectionLost,
        ErrorCode::HostUnreachable,
        ErrorCode::ServiceUnavailable,
        ErrorCode::DnsResolutionFailed,
        ErrorCode::ConnectionRefused,
        ErrorCode::RelayDisconnected,
        ErrorCode::PermissionDenied,
        ErrorCode::AuthenticationFailed,
        ErrorCode::LocalNetworkAccessDenied,
        ErrorCode::InvalidParameter,
        ErrorCode::InvalidConfiguration,
        ErrorCode::InvalidState,
        ErrorCode::ProtocolVersionMismatch,
        ErrorCode::MalformedMessage,
        ErrorCode::UnexpectedResponse,
        ErrorCode::RoomFull,
        ErrorCode::RateLimited,
        ErrorCode::OutOfMemory,
        ErrorCode::SecurityViolation,
        ErrorCode::CertificateInvalid,
        ErrorCode::PacketRejected,
        ErrorCode::NotSupported,
        ErrorCode::AdapterUnavailable,
        ErrorCode::Unknown,
        ErrorCode::InternalError,
        ErrorCode::OperationAborted,
    ];

    /// Numeric value of the code
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Look up a known code by its numeric value
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|known| known.code() == code)
    }

    /// Every code defined by this version of the enumeration
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &Self::ALL
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error type for every fallible operation of the resilience core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open and rejecting calls
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),
    /// Half-open circuit breaker has no free trial slot
    #[error("Circuit breaker '{0}' is half-open and at its trial call limit")]
    HalfOpenLimitReached(String),
    /// No backend or service can serve the request
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Operation is invalid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Error code is excluded from automatic retries
    #[error("Error code {code} is not retryable")]
    NonRetryable {
        /// Rejected error code
        code: u32,
    },
    /// Wrapped operation failed with a specific code
    #[error("Operation failed ({code}): {message}")]
    Operation {
        /// Numeric error code reported by the operation
        code: u32,
        /// Failure description
        message: String,
    },
    /// Internal failure, including panics captured from wrapped operations
    #[error("Internal error: {0}")]
    Internal(String),
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Work was cancelled before completion
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl ResilienceError {
    /// Convenience constructor for operation failures carrying a known code
    #[must_use]
    pub fn operation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Operation { code: code.code(), message: message.into() }
    }

    /// Numeric error code describing this error
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::CircuitOpen(_) | Self::HalfOpenLimitReached(_) | Self::ServiceUnavailable(_) => {
                ErrorCode::ServiceUnavailable.code()
            }
            Self::InvalidState(_) => ErrorCode::InvalidState.code(),
            Self::NonRetryable { code } | Self::Operation { code, .. } => *code,
            Self::Internal(_) => ErrorCode::InternalError.code(),
            Self::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration.code(),
            Self::Serialization(_) => ErrorCode::MalformedMessage.code(),
            Self::Aborted(_) => ErrorCode::OperationAborted.code(),
        }
    }

    /// True for rejections that mean "try again later or elsewhere"
    #[must_use]
    pub fn is_service_unavailable(&self) -> bool {
        self.code() == ErrorCode::ServiceUnavailable.code()
    }
}

// Re-export classification types and functions
pub use classification::{
    ErrorCategory, ErrorClassifier, get_default_message, get_error_category, is_fallback_worthy,
    is_retryable_code,
};
