//! STRATA Runtime
//!
//! Dependency-aware parallel execution of operation batches.
//! Runs planned stages across a bounded, priority-ordered worker pool
//! with per-operation timeouts, cooperative cancellation, and advisory
//! run-level resource ceilings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod events;
pub mod handler;
pub mod monitor;
pub mod pool;

pub use config::{ConfigError, StrataConfig};
pub use engine::{ExecuteOptions, ExecutionEngine, ExecutionError};
pub use events::{ChannelObserver, ExecutionEvent, ExecutionObserver, ProgressInfo};
pub use handler::{FnHandler, HandlerRegistry, OperationHandler, handler_fn};
pub use monitor::{LimitStatus, LimitViolation, ResourceLimits, ResourceMonitor, ResourceUsage};
pub use pool::{PoolConfig, PoolError, ShutdownReport, StartHook, WorkerPool, WorkerPoolStats};

pub use tokio_util::sync::CancellationToken;
