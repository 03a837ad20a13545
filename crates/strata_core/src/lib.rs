//! STRATA Core Types
//!
//! This crate contains the operation data model shared by the planner and
//! the runtime. Pure types with no I/O; everything is serde-serializable.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod operation;
pub mod result;

// Re-exports
pub use error::OperationError;
pub use id::{OperationId, RunId};
pub use operation::{Operation, OperationKind};
pub use result::{duration_ms, OperationResult, OperationStatus, PendingResult};
