//! Configuration for the resilience components.
//!
//! Each component owns its config struct; [`ResilienceConfig`] bundles them
//! so a frontend can load one JSON document. Durations are stored as whole
//! milliseconds.
//!
//! # Examples
//! ```rust
//! use netplay_resilience::config::ResilienceConfig;
//!
//! let json = r#"{ "recovery": { "max_retries": 5 } }"#;
//! let config = ResilienceConfig::from_json_str(json).expect("valid config");
//! assert_eq!(config.recovery.max_retries, 5);
//! assert_eq!(config.circuit_breaker.failure_threshold, 5);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use crate::error::error_recovery::{
    CircuitBreakerConfig, DegradationConfig, ErrorHandlerConfig, RecoveryConfig,
};
use crate::error::types::Result;
use serde::{Deserialize, Serialize};

/// Serde adapter storing a [`std::time::Duration`] as milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as a `u64` millisecond count, saturating.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize from a `u64` millisecond count.
    ///
    /// # Errors
    ///
    /// Fails if the value is not an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Settings of every resilience component.
///
/// Missing sections and fields take their defaults when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Connection recovery settings
    pub recovery: RecoveryConfig,
    /// Graceful degradation settings
    pub degradation: DegradationConfig,
    /// Error handler settings
    pub error_handler: ErrorHandlerConfig,
}

impl ResilienceConfig {
    /// Create a configuration with all defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a section fails validation.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate()?;
        self.recovery.validate()?;
        self.degradation.validate()?;
        self.error_handler.validate()
    }
}
