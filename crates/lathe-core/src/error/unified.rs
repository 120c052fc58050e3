//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::classify::ErrorClass;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Network and rate-limit failures; retried with backoff, then failover.
    Transient,
    /// Authentication or validation failures; surfaced immediately.
    Permanent,
    /// Malformed tool-call payload; scoped to one call.
    Extraction,
    /// A tool could not acquire its resource lock in time.
    LockTimeout,
    /// Cooperative cancellation. Not a failure.
    Cancellation,
    Configuration,
    Unknown,
}

impl From<ErrorClass> for ErrorCategory {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Transient => Self::Transient,
            ErrorClass::Permanent => Self::Permanent,
            ErrorClass::Unknown => Self::Unknown,
        }
    }
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    ReissueToolCall,
    RetryLater,
    ReportIssue,
    None,
}

/// Terminal failure reported to the host.
///
/// The category lets a UI decide whether to offer a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub category: ErrorCategory,
    pub message: String,
}

impl RunFailure {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Whether a host should offer the user a retry.
    pub fn is_retry_candidate(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Transient | ErrorCategory::LockTimeout | ErrorCategory::Unknown
        )
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}
