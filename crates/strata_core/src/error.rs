//! Per-operation error type.
//!
//! Failures inside one operation are recorded as data on its result,
//! never thrown across the batch.

use serde::{Deserialize, Serialize};

/// Error carried by a failed or cancelled operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    /// Human-readable message
    pub message: String,
    /// Optional machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl OperationError {
    /// Code for operations that exceeded the worker timeout
    pub const TIMEOUT: &'static str = "TIMEOUT";
    /// Code for operations stopped by a cancellation token
    pub const CANCELLED: &'static str = "CANCELLED";
    /// Code for failures raised by the execution routine
    pub const EXECUTION_FAILED: &'static str = "EXECUTION_FAILED";
    /// Code for operations dropped by a pool shutdown
    pub const POOL_ABANDONED: &'static str = "POOL_ABANDONED";
    /// Code for operations whose kind has no registered handler
    pub const NO_HANDLER: &'static str = "NO_HANDLER";

    /// Create an error without a code
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error with a code
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Timeout error for the given deadline
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::with_code(
            format!("Operation timed out after {}ms", after.as_millis()),
            Self::TIMEOUT,
        )
    }

    /// Cancellation error
    #[must_use]
    pub fn cancelled() -> Self {
        Self::with_code("Operation cancelled", Self::CANCELLED)
    }

    /// Whether this error is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some(Self::TIMEOUT)
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = OperationError::new("file not found");
        assert_eq!(format!("{}", err), "file not found");
        assert!(err.code.is_none());
    }

    #[test]
    fn test_timeout_error() {
        let err = OperationError::timeout(Duration::from_millis(50));
        assert!(err.is_timeout());
        assert!(err.message.contains("timed out"));
        assert!(err.message.contains("50ms"));
    }

    #[test]
    fn test_cancelled_error() {
        let err = OperationError::cancelled();
        assert_eq!(err.code.as_deref(), Some(OperationError::CANCELLED));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_code_skipped_when_absent() {
        let encoded = serde_json::to_value(OperationError::new("boom")).unwrap();
        assert!(encoded.get("code").is_none());
    }
}
