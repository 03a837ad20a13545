//! Lifecycle events emitted while a run executes.
//!
//! Observers receive events synchronously on the engine's task, so they
//! should hand work off rather than block.

use serde::Serialize;
use strata_core::{OperationId, OperationKind, OperationResult, RunId};
use tokio::sync::mpsc;

/// Progress snapshot after an operation settles
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Operations that reached a terminal state
    pub completed_operations: usize,
    /// Operations in the batch
    pub total_operations: usize,
    /// `completed / total * 100`, 100 for an empty batch
    pub percent_complete: f64,
}

impl ProgressInfo {
    /// Build a snapshot
    #[must_use]
    pub fn new(completed_operations: usize, total_operations: usize) -> Self {
        let percent_complete = if total_operations == 0 {
            100.0
        } else {
            completed_operations as f64 / total_operations as f64 * 100.0
        };
        Self {
            completed_operations,
            total_operations,
            percent_complete,
        }
    }

    /// Whether every operation has settled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_operations >= self.total_operations
    }
}

/// Lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    /// Plan built, about to run the first stage
    RunStarted {
        /// Run id
        run_id: RunId,
        /// Operations in the batch
        total_operations: usize,
        /// Stages in the plan
        stage_count: usize,
    },
    /// A stage is about to be submitted
    StageStarted {
        /// Run id
        run_id: RunId,
        /// Zero-based stage index
        stage: usize,
        /// Operations in the stage
        size: usize,
        /// Whether operations are submitted concurrently
        parallel: bool,
    },
    /// A worker picked an operation up
    OperationStarted {
        /// Run id
        run_id: RunId,
        /// Operation id
        operation_id: OperationId,
        /// Operation kind
        kind: OperationKind,
    },
    /// An operation reached a terminal state
    OperationCompleted {
        /// Run id
        run_id: RunId,
        /// Final result
        result: OperationResult,
    },
    /// Progress after a settlement
    Progress {
        /// Run id
        run_id: RunId,
        /// Snapshot
        progress: ProgressInfo,
    },
    /// Every operation in a stage settled
    StageCompleted {
        /// Run id
        run_id: RunId,
        /// Zero-based stage index
        stage: usize,
        /// Failed operations in the stage
        failed: usize,
    },
    /// The run processed every stage
    RunCompleted {
        /// Run id
        run_id: RunId,
        /// Results collected
        results: usize,
    },
    /// The run stopped early
    RunAborted {
        /// Run id
        run_id: RunId,
        /// Why it stopped
        reason: String,
        /// Results collected before stopping
        results: usize,
    },
}

impl ExecutionEvent {
    /// Run the event belongs to
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::OperationStarted { run_id, .. }
            | Self::OperationCompleted { run_id, .. }
            | Self::Progress { run_id, .. }
            | Self::StageCompleted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunAborted { run_id, .. } => *run_id,
        }
    }

    /// Whether this event ends the run
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunAborted { .. })
    }
}

/// Receives lifecycle events
pub trait ExecutionObserver: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &ExecutionEvent);
}

impl<F> ExecutionObserver for F
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExecutionEvent) {
        self(event);
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ExecutionObserver for ChannelObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}
