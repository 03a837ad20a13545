//! STRATA Planner
//!
//! Turns a flat operation batch into an ordered sequence of execution
//! stages that respects declared dependencies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod planner;
pub mod stage;
pub mod validate;

pub use planner::{OperationPlanner, PlanError};
pub use stage::{ExecutionPlan, ExecutionStage};
pub use validate::{DependencyIssue, find_cycle, validate_dependencies};
