//! Stand-in execution routine for dry runs.
//!
//! Payload fields understood:
//! - `simulateMs`: how long the operation takes
//! - `fail`: error message to fail with (or `true` for a generic one)

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use strata_core::{Operation, OperationError};
use strata_runtime::{CancellationToken, OperationHandler};

/// Sleeps for the requested time, then succeeds or fails as told
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedHandler {
    /// Duration used when the payload gives none
    pub default_delay: Duration,
}

impl SimulatedHandler {
    fn delay(&self, operation: &Operation) -> Duration {
        operation.payload["simulateMs"]
            .as_u64()
            .map_or(self.default_delay, Duration::from_millis)
    }
}

fn failure(payload: &Value) -> Option<String> {
    match &payload["fail"] {
        Value::Bool(true) => Some("simulated failure".to_string()),
        Value::String(message) => Some(message.clone()),
        _ => None,
    }
}

#[async_trait]
impl OperationHandler for SimulatedHandler {
    async fn perform(
        &self,
        operation: &Operation,
        cancel: CancellationToken,
    ) -> Result<Value, OperationError> {
        let delay = self.delay(operation);
        tokio::select! {
            () = cancel.cancelled() => return Err(OperationError::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }

        if let Some(message) = failure(&operation.payload) {
            return Err(OperationError::with_code(message, "SIMULATED"));
        }
        Ok(json!({
            "operation": operation.id,
            "type": operation.kind,
            "mutating": operation.kind.is_mutating(),
            "simulatedMs": delay.as_millis() as u64,
        }))
    }
}
