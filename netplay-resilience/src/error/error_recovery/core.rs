//! Core Error Structures
//!
//! This module contains the error record shared by every component of the
//! recovery system and the notification types surfaced to the UI.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use crate::error::types::classification::builtin_classifier;
use crate::error::types::{ErrorCategory, ErrorClassifier, ResilienceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A reported failure with classification and enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Category derived from the code
    pub category: ErrorCategory,
    /// Numeric error code
    pub code: u32,
    /// Human-readable message
    pub message: String,
    /// How long the caller should wait before retrying
    pub retry_after: Option<Duration>,
    /// Ordered actions the user may take
    pub suggested_actions: Vec<String>,
    /// When the error was created
    pub timestamp: DateTime<Utc>,
    /// Component that reported the error
    pub component: String,
    /// Free-form diagnostic context
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Create an error record classified with the built-in tables.
    ///
    /// An empty message is replaced with the default message of the code.
    #[must_use]
    pub fn new(code: impl Into<u32>, message: impl Into<String>, component: impl Into<String>) -> Self {
        Self::classified(builtin_classifier(), code.into(), message.into(), component.into())
    }

    /// Create an error record classified with a custom classifier
    #[must_use]
    pub fn classified(
        classifier: &ErrorClassifier,
        code: u32,
        message: String,
        component: String,
    ) -> Self {
        let message = if message.is_empty() { classifier.default_message(code) } else { message };
        Self {
            category: classifier.category(code),
            code,
            message,
            retry_after: None,
            suggested_actions: Vec::new(),
            timestamp: Utc::now(),
            component,
            context: HashMap::new(),
        }
    }

    /// Build an error record from a resilience error raised by `component`
    #[must_use]
    pub fn from_error(error: &ResilienceError, component: impl Into<String>) -> Self {
        Self::new(error.code(), error.to_string(), component)
    }

    /// Add a context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Set the retry-after hint
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Append a suggested action
    #[must_use]
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_actions.push(action.into());
        self
    }
}

/// How prominently the UI should show an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// Transient toast
    Info,
    /// Persistent banner
    Warning,
    /// Blocking modal
    Error,
    /// Full-screen error
    Critical,
}

impl NotificationLevel {
    /// Default level for a category
    #[must_use]
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::NetworkConnectivity => NotificationLevel::Warning,
            ErrorCategory::PermissionDenied | ErrorCategory::ConfigurationError => {
                NotificationLevel::Error
            }
            ErrorCategory::SecurityViolation => NotificationLevel::Critical,
            ErrorCategory::ProtocolMismatch
            | ErrorCategory::ResourceExhausted
            | ErrorCategory::HardwareLimitation
            | ErrorCategory::Unknown => NotificationLevel::Info,
        }
    }

    /// How long the notification stays up; `None` means until dismissed
    #[must_use]
    pub fn auto_dismiss(self) -> Option<Duration> {
        match self {
            NotificationLevel::Info => Some(Duration::from_secs(3)),
            NotificationLevel::Warning => Some(Duration::from_secs(10)),
            NotificationLevel::Error | NotificationLevel::Critical => None,
        }
    }
}

/// Notification handed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Display level
    pub level: NotificationLevel,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Error code that triggered the notification
    pub error_code: u32,
    /// Actions offered to the user
    pub suggested_actions: Vec<String>,
    /// Auto-dismiss delay
    pub auto_dismiss: Option<Duration>,
}

impl Notification {
    /// Build the notification for an error at the given level
    #[must_use]
    pub fn for_error(error: &ErrorInfo, level: NotificationLevel) -> Self {
        Self {
            level,
            title: format!("{} error", error.category),
            message: error.message.clone(),
            error_code: error.code,
            suggested_actions: error.suggested_actions.clone(),
            auto_dismiss: level.auto_dismiss(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::types::ErrorCode;

    #[test]
    fn test_empty_message_uses_default() {
        let info = ErrorInfo::new(ErrorCode::NetworkTimeout, "", "Net");
        assert_eq!(info.message, "Unable to connect to multiplayer service");
        assert_eq!(info.category, ErrorCategory::NetworkConnectivity);
        assert_eq!(info.component, "Net");
    }

    #[test]
    fn test_builder_methods() {
        let info = ErrorInfo::new(ErrorCode::RoomFull, "room 7 is full", "RoomClient")
            .with_context("room", "7")
            .with_retry_after(Duration::from_secs(5))
            .with_suggested_action("Join another room");

        assert_eq!(info.context.get("room").map(String::as_str), Some("7"));
        assert_eq!(info.retry_after, Some(Duration::from_secs(5)));
        assert_eq!(info.suggested_actions, vec!["Join another room".to_string()]);
    }

    #[test]
    fn test_notification_levels() {
        assert_eq!(
            NotificationLevel::for_category(ErrorCategory::SecurityViolation),
            NotificationLevel::Critical
        );
        assert_eq!(NotificationLevel::Info.auto_dismiss(), Some(Duration::from_secs(3)));
        assert_eq!(NotificationLevel::Warning.auto_dismiss(), Some(Duration::from_secs(10)));
        assert_eq!(NotificationLevel::Error.auto_dismiss(), None);
        assert!(NotificationLevel::Info < NotificationLevel::Critical);
    }
}
