//! Operation results.
//!
//! A result is created when a worker picks an operation up and finalized
//! exactly once, when the routine settles, times out, or is cancelled.

use crate::error::OperationError;
use crate::id::OperationId;
use crate::operation::{Operation, OperationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Terminal status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Routine returned data
    Success,
    /// Routine returned an error or timed out
    Failed,
    /// Stopped by a cancellation token before or while running
    Cancelled,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Id of the operation
    pub operation_id: OperationId,
    /// Kind of the operation
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Terminal status
    pub status: OperationStatus,
    /// When a worker picked the operation up
    pub start_time: DateTime<Utc>,
    /// When the result was finalized
    pub end_time: DateTime<Utc>,
    /// Elapsed time between start and end
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure or cancellation detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl OperationResult {
    /// Start timing an operation; finish with one of the `finish_*` methods
    #[must_use]
    pub fn start(operation: &Operation) -> PendingResult {
        PendingResult {
            operation_id: operation.id.clone(),
            kind: operation.kind,
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Result for an operation cancelled before it ever started
    #[must_use]
    pub fn cancelled_before_start(operation: &Operation) -> Self {
        Self::start(operation).finish_cancelled()
    }

    /// Whether the operation succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    /// Whether the operation failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    /// Whether the operation was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == OperationStatus::Cancelled
    }

    /// Error message, if any
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// A result whose start fields are set but which is not yet finalized
#[derive(Debug, Clone)]
pub struct PendingResult {
    operation_id: OperationId,
    kind: OperationKind,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl PendingResult {
    /// Id of the operation being timed
    #[must_use]
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// Finalize as success
    #[must_use]
    pub fn finish_success(self, data: serde_json::Value) -> OperationResult {
        self.finish(OperationStatus::Success, Some(data), None)
    }

    /// Finalize as failed
    #[must_use]
    pub fn finish_failed(self, error: OperationError) -> OperationResult {
        self.finish(OperationStatus::Failed, None, Some(error))
    }

    /// Finalize as cancelled
    #[must_use]
    pub fn finish_cancelled(self) -> OperationResult {
        self.finish(
            OperationStatus::Cancelled,
            None,
            Some(OperationError::cancelled()),
        )
    }

    fn finish(
        self,
        status: OperationStatus,
        data: Option<serde_json::Value>,
        error: Option<OperationError>,
    ) -> OperationResult {
        OperationResult {
            operation_id: self.operation_id,
            kind: self.kind,
            status,
            start_time: self.start_time,
            end_time: Utc::now(),
            duration: self.started.elapsed(),
            data,
            error,
        }
    }
}

/// Serde adapter writing a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Write as milliseconds, saturating at `u64::MAX`
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Read milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_op() -> Operation {
        Operation::new("a", OperationKind::Analyze)
    }

    #[test]
    fn test_finish_success() {
        let result = OperationResult::start(&make_test_op()).finish_success(json!({"lines": 3}));
        assert!(result.is_success());
        assert_eq!(result.operation_id.as_str(), "a");
        assert_eq!(result.kind, OperationKind::Analyze);
        assert_eq!(result.data, Some(json!({"lines": 3})));
        assert!(result.error.is_none());
        assert!(result.end_time >= result.start_time);
    }

    #[test]
    fn test_finish_failed() {
        let result = OperationResult::start(&make_test_op())
            .finish_failed(OperationError::new("parse error"));
        assert!(result.is_failed());
        assert_eq!(result.error_message(), Some("parse error"));
        assert!(result.data.is_none());
    }

    #[test]
    fn test_cancelled_before_start() {
        let result = OperationResult::cancelled_before_start(&make_test_op());
        assert!(result.is_cancelled());
        assert_eq!(
            result.error.unwrap().code.as_deref(),
            Some(OperationError::CANCELLED)
        );
    }

    #[test]
    fn test_result_wire_shape() {
        let result = OperationResult::start(&make_test_op()).finish_success(json!(1));
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(encoded["operationId"], "a");
        assert_eq!(encoded["type"], "analyze");
        assert_eq!(encoded["status"], "success");
        assert!(encoded["duration"].is_u64());
        assert!(encoded.get("error").is_none());

        let back: OperationResult = serde_json::from_value(encoded).unwrap();
        assert_eq!(back.operation_id, result.operation_id);
        assert_eq!(back.status, OperationStatus::Success);
    }
}
