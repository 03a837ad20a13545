//! Bounded, priority-ordered worker pool.
//!
//! The pool owns a queue of admitted operations and a fixed number of
//! execution slots. Admission never waits: a submission either starts, is
//! queued, or is rejected on the spot. Among queued operations the highest
//! priority runs first, ties broken by submission order.
//!
//! `WorkerPool` is a cheap handle; clones share one queue and slot table.

use crate::config::ConfigError;
use crate::handler::OperationHandler;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strata_core::{Operation, OperationError, OperationId, OperationResult, OperationStatus};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

/// Hook fired when a slot picks an operation up
pub type StartHook = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Concurrent execution slots
    pub max_workers: usize,
    /// Admitted operations allowed to wait for a slot
    pub queue_size: usize,
    /// Per-operation deadline
    #[serde(rename = "workerTimeoutMs", with = "strata_core::duration_ms")]
    pub worker_timeout: Duration,
}

impl PoolConfig {
    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_workers: 4,
            queue_size: 100,
            worker_timeout: Duration::from_secs(30),
        }
    }

    /// Set the number of slots
    #[must_use]
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the queue size
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Set the per-operation deadline
    #[must_use]
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero workers or a zero timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "pool.maxWorkers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "pool.workerTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Submission-time rejection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every slot is busy and the queue is at capacity
    #[error("Worker pool queue is full ({queue_size} queued)")]
    QueueFull {
        /// Configured queue size
        queue_size: usize,
    },

    /// The pool no longer accepts work
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    /// Shutdown gave up on the operation while it was running
    #[error("Operation {operation_id} abandoned by pool shutdown")]
    Abandoned {
        /// The abandoned operation
        operation_id: OperationId,
    },
}

/// Aggregate pool counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolStats {
    /// Operations that reached any terminal status
    pub completed_tasks: u64,
    /// Running mean of `duration` over all completions
    #[serde(rename = "averageExecutionTimeMs", with = "strata_core::duration_ms")]
    pub average_execution_time: Duration,
    /// Slots currently busy
    pub active_workers: usize,
    /// Operations waiting for a slot
    pub queued_tasks: usize,
    /// Configured slot count
    pub max_workers: usize,
    /// Completions with status success
    pub succeeded: u64,
    /// Completions with status failed, timeouts included
    pub failed: u64,
    /// Completions with status cancelled
    pub cancelled: u64,
    /// Failures caused by the worker timeout
    pub timed_out: u64,
    /// Submissions refused at admission
    pub rejected: u64,
}

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Every admitted operation finished before the deadline
    pub drained: bool,
    /// Running operations given up on at the deadline
    pub abandoned: usize,
    /// Queued operations settled as cancelled at the deadline
    pub cancelled: usize,
}

struct QueuedTask {
    priority: i32,
    seq: u64,
    operation: Operation,
    cancel: CancellationToken,
    reply: oneshot::Sender<OperationResult>,
    on_start: Option<StartHook>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A busy slot; removing it from the table discards the eventual result
struct RunningSlot {
    token: CancellationToken,
    reply: oneshot::Sender<OperationResult>,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    average_nanos: f64,
    succeeded: u64,
    failed: u64,
    cancelled: u64,
    timed_out: u64,
    rejected: u64,
}

impl Counters {
    fn record(&mut self, result: &OperationResult) {
        self.completed += 1;
        let nanos = result.duration.as_nanos() as f64;
        self.average_nanos += (nanos - self.average_nanos) / self.completed as f64;

        match result.status {
            OperationStatus::Success => self.succeeded += 1,
            OperationStatus::Failed => {
                self.failed += 1;
                if result.error.as_ref().is_some_and(OperationError::is_timeout) {
                    self.timed_out += 1;
                }
            }
            OperationStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    running: HashMap<u64, RunningSlot>,
    active: usize,
    next_seq: u64,
    shutting_down: bool,
    counters: Counters,
}

struct PoolInner {
    config: PoolConfig,
    handler: Arc<dyn OperationHandler>,
    state: Mutex<PoolState>,
    idle: Notify,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // State is only touched in short non-panicking sections
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill free slots from the head of the queue
    fn dispatch(self: &Arc<Self>, state: &mut PoolState) {
        while state.active < self.config.max_workers {
            let Some(task) = state.queue.pop() else {
                break;
            };
            state.active += 1;
            let token = task.cancel.child_token();
            state.running.insert(
                task.seq,
                RunningSlot {
                    token: token.clone(),
                    reply: task.reply,
                },
            );
            tracing::debug!(
                operation_id = %task.operation.id,
                priority = task.priority,
                active = state.active,
                "dispatching operation"
            );
            tokio::spawn(Arc::clone(self).run(task.seq, task.operation, token, task.on_start));
        }
    }

    async fn run(
        self: Arc<Self>,
        seq: u64,
        operation: Operation,
        token: CancellationToken,
        on_start: Option<StartHook>,
    ) {
        let result = if token.is_cancelled() {
            OperationResult::cancelled_before_start(&operation)
        } else {
            if let Some(hook) = on_start {
                hook();
            }
            self.perform(&operation, &token).await
        };
        // Ask a still-running routine to stop; no-op once it has settled
        token.cancel();
        self.finish(seq, result);
    }

    async fn perform(&self, operation: &Operation, token: &CancellationToken) -> OperationResult {
        let pending = OperationResult::start(operation);
        let deadline = self.config.worker_timeout;
        let routine = AssertUnwindSafe(self.handler.perform(operation, token.clone())).catch_unwind();

        tokio::select! {
            biased;
            () = token.cancelled() => pending.finish_cancelled(),
            outcome = tokio::time::timeout(deadline, routine) => {
                match outcome {
                    Ok(Ok(Ok(data))) => pending.finish_success(data),
                    Ok(Ok(Err(mut error))) => {
                        if error.code.is_none() {
                            error.code = Some(OperationError::EXECUTION_FAILED.to_string());
                        }
                        pending.finish_failed(error)
                    }
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(operation_id = %operation.id, %message, "operation panicked");
                        pending.finish_failed(OperationError::with_code(
                            format!("Operation panicked: {message}"),
                            OperationError::EXECUTION_FAILED,
                        ))
                    }
                    Err(_) => {
                        tracing::warn!(
                            operation_id = %operation.id,
                            timeout_ms = deadline.as_millis() as u64,
                            "operation timed out"
                        );
                        pending.finish_failed(OperationError::timeout(deadline))
                    }
                }
            }
        }
    }

    fn finish(self: &Arc<Self>, seq: u64, result: OperationResult) {
        let mut state = self.lock();
        state.active -= 1;
        state.counters.record(&result);
        let slot = state.running.remove(&seq);
        self.dispatch(&mut state);
        if state.active == 0 && state.queue.is_empty() {
            self.idle.notify_waiters();
        }
        drop(state);

        match slot {
            Some(slot) => {
                // Submitter may have gone away
                let _ = slot.reply.send(result);
            }
            None => tracing::debug!(
                operation_id = %result.operation_id,
                status = %result.status,
                "discarding result of abandoned operation"
            ),
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.active == 0 && state.queue.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Bounded worker pool
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool running operations through `handler`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `config` fails
    /// [`PoolConfig::validate`]
    pub fn new(config: PoolConfig, handler: impl OperationHandler + 'static) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                handler: Arc::new(handler),
                state: Mutex::new(PoolState::default()),
                idle: Notify::new(),
            }),
        })
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Operations the pool can hold at once, running plus queued
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.config.max_workers + self.inner.config.queue_size
    }

    /// Whether shutdown has begun
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Run one operation
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::QueueFull`] or [`PoolError::ShuttingDown`] when the
    /// submission is refused, and [`PoolError::Abandoned`] when a shutdown
    /// gives up on the operation while it runs.
    pub async fn execute(
        &self,
        operation: Operation,
        priority: i32,
        cancel: CancellationToken,
    ) -> Result<OperationResult, PoolError> {
        self.execute_observed(operation, priority, cancel, None).await
    }

    /// Run one operation, calling `on_start` when a slot picks it up
    ///
    /// The hook is not called for operations that never start.
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::execute`].
    pub async fn execute_observed(
        &self,
        operation: Operation,
        priority: i32,
        cancel: CancellationToken,
        on_start: Option<StartHook>,
    ) -> Result<OperationResult, PoolError> {
        let operation_id = operation.id.clone();
        let (reply, mut receiver) = oneshot::channel();

        let seq = {
            let mut state = self.inner.lock();
            if state.shutting_down {
                state.counters.rejected += 1;
                tracing::warn!(%operation_id, "rejected: pool is shutting down");
                return Err(PoolError::ShuttingDown);
            }
            if cancel.is_cancelled() {
                let result = OperationResult::cancelled_before_start(&operation);
                state.counters.record(&result);
                return Ok(result);
            }
            let config = &self.inner.config;
            if state.active >= config.max_workers && state.queue.len() >= config.queue_size {
                state.counters.rejected += 1;
                tracing::warn!(
                    %operation_id,
                    queued = state.queue.len(),
                    "rejected: queue is full"
                );
                return Err(PoolError::QueueFull {
                    queue_size: config.queue_size,
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedTask {
                priority,
                seq,
                operation,
                cancel: cancel.clone(),
                reply,
                on_start,
            });
            tracing::debug!(%operation_id, priority, queued = state.queue.len(), "operation admitted");
            self.inner.dispatch(&mut state);
            seq
        };

        tokio::select! {
            biased;
            reply = &mut receiver => return reply.map_err(|_| PoolError::Abandoned { operation_id }),
            () = cancel.cancelled() => {}
        }

        // Cancelled: pull the operation if no slot has taken it yet
        let removed = {
            let mut state = self.inner.lock();
            let (matched, rest): (Vec<QueuedTask>, Vec<QueuedTask>) = std::mem::take(&mut state.queue)
                .into_iter()
                .partition(|task| task.seq == seq);
            state.queue = BinaryHeap::from(rest);
            matched.into_iter().next().map(|task| {
                let result = OperationResult::cancelled_before_start(&task.operation);
                state.counters.record(&result);
                result
            })
        };

        match removed {
            Some(result) => {
                tracing::debug!(%operation_id, "cancelled while queued");
                Ok(result)
            }
            None => receiver.await.map_err(|_| PoolError::Abandoned { operation_id }),
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        let state = self.inner.lock();
        let counters = &state.counters;
        WorkerPoolStats {
            completed_tasks: counters.completed,
            average_execution_time: Duration::from_nanos(counters.average_nanos as u64),
            active_workers: state.active,
            queued_tasks: state.queue.len(),
            max_workers: self.inner.config.max_workers,
            succeeded: counters.succeeded,
            failed: counters.failed,
            cancelled: counters.cancelled,
            timed_out: counters.timed_out,
            rejected: counters.rejected,
        }
    }

    /// Stop accepting work and wait up to `timeout` for admitted work to finish
    ///
    /// At the deadline, queued operations settle as cancelled and running
    /// operations are abandoned: their tokens are cancelled and their
    /// submitters receive [`PoolError::Abandoned`].
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.inner.lock().shutting_down = true;
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "worker pool shutting down");

        if tokio::time::timeout(timeout, self.wait_idle()).await.is_ok() {
            return ShutdownReport {
                drained: true,
                abandoned: 0,
                cancelled: 0,
            };
        }

        let (queued, running) = {
            let mut state = self.inner.lock();
            let running: Vec<RunningSlot> = state.running.drain().map(|(_, slot)| slot).collect();
            let queued: Vec<QueuedTask> = state.queue.drain().collect();
            let queued: Vec<(QueuedTask, OperationResult)> = queued
                .into_iter()
                .map(|task| {
                    let mut result = OperationResult::cancelled_before_start(&task.operation);
                    result.error = Some(OperationError::with_code(
                        "Operation cancelled by pool shutdown",
                        OperationError::POOL_ABANDONED,
                    ));
                    state.counters.record(&result);
                    (task, result)
                })
                .collect();
            (queued, running)
        };

        let cancelled = queued.len();
        for (task, result) in queued {
            let _ = task.reply.send(result);
        }
        let abandoned = running.len();
        // Dropping the slots closes the submitters' channels
        for slot in running {
            slot.token.cancel();
        }

        tracing::warn!(abandoned, cancelled, "shutdown deadline reached");
        ShutdownReport {
            drained: false,
            abandoned,
            cancelled,
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
