//! Error types for Lathe.

pub mod classify;
pub mod unified;

pub use classify::{classify, ErrorClass};
pub use unified::{ErrorCategory, RecoverySuggestion, RunFailure};

use thiserror::Error;

use crate::locks::LockMode;

/// Primary error type for all Lathe operations.
#[derive(Error, Debug)]
pub enum LatheError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error ({provider}): {message}")]
    Transport { provider: String, message: String },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed tool call: {message}")]
    Extraction {
        tool_name: Option<String>,
        message: String,
    },

    #[error("Timed out after {waited_ms}ms waiting for {mode} lock on {key}")]
    LockTimeout {
        key: String,
        mode: LockMode,
        waited_ms: u64,
    },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("All providers failed after {attempts} attempts: {message}")]
    ProvidersExhausted { attempts: u32, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LatheError {
    /// Create a transport error for the named provider.
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an extraction error, optionally scoped to a tool name.
    pub fn extraction(tool_name: Option<&str>, message: impl Into<String>) -> Self {
        Self::Extraction {
            tool_name: tool_name.map(str::to_string),
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { message, .. } | Self::Stream(message) => {
                ErrorCategory::from(classify(message))
            }
            Self::RateLimited { .. } | Self::Timeout(_) => ErrorCategory::Transient,
            Self::Io(err) => ErrorCategory::from(classify(&err.to_string())),
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Extraction { .. } => ErrorCategory::Extraction,
            Self::LockTimeout { .. } => ErrorCategory::LockTimeout,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::InvalidArgument(_) | Self::UnsupportedOperation(_) => ErrorCategory::Permanent,
            Self::ProvidersExhausted { .. } => ErrorCategory::Transient,
            Self::ToolExecution { .. } | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error may be retried with backoff.
    ///
    /// Only transient failures qualify; unknown errors fail fast.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ProvidersExhausted { .. })
            && self.category() == ErrorCategory::Transient
    }

    /// Whether this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Transient => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Permanent => RecoverySuggestion::CheckCredentials,
            ErrorCategory::Extraction => RecoverySuggestion::ReissueToolCall,
            ErrorCategory::LockTimeout => RecoverySuggestion::RetryLater,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Cancellation => RecoverySuggestion::None,
            ErrorCategory::Unknown => RecoverySuggestion::ReportIssue,
        }
    }

    /// Convert into the user-facing failure record.
    pub fn to_failure(&self) -> RunFailure {
        RunFailure {
            category: self.category(),
            message: self.to_string(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LatheError>;
