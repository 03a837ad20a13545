//! Parallel execution engine.
//!
//! Plans a batch, then runs it stage by stage through the worker pool. A
//! stage is submitted only once every operation of the previous stage has
//! settled. Within a stage, results are appended in plan order.

use crate::config::StrataConfig;
use crate::events::{ExecutionEvent, ExecutionObserver, ProgressInfo};
use crate::monitor::{LimitStatus, LimitViolation, ResourceLimits, ResourceMonitor};
use crate::pool::{PoolError, StartHook, WorkerPool};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::{Operation, OperationId, OperationResult, RunId};
use strata_plan::{ExecutionPlan, ExecutionStage, OperationPlanner, PlanError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

type ProgressFn = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Per-run options
#[derive(Clone)]
pub struct ExecuteOptions {
    /// Keep running later stages after an operation fails
    pub continue_on_error: bool,
    /// Stops submission of further operations when cancelled
    pub cancel: CancellationToken,
    /// Ceilings used when no monitor is supplied
    pub resource_limits: ResourceLimits,
    progress: Option<ProgressFn>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    monitor: Option<Arc<ResourceMonitor>>,
}

impl ExecuteOptions {
    /// Options with defaults: continue on error, fresh token, default limits
    #[must_use]
    pub fn new() -> Self {
        Self {
            continue_on_error: true,
            cancel: CancellationToken::new(),
            resource_limits: ResourceLimits::default(),
            progress: None,
            observer: None,
            monitor: None,
        }
    }

    /// Options taking the error policy and limits from a config
    #[must_use]
    pub fn from_config(config: &StrataConfig) -> Self {
        Self::new()
            .with_continue_on_error(config.continue_on_error)
            .with_resource_limits(config.limits)
    }

    /// Set the error policy
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Use a caller-owned cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called after every settlement
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Receive lifecycle events
    #[must_use]
    pub fn with_observer(mut self, observer: impl ExecutionObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set the run-level ceilings
    #[must_use]
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Check limits against a shared monitor instead of a fresh one
    ///
    /// The monitor's own limits take precedence over `resource_limits`.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("continue_on_error", &self.continue_on_error)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("resource_limits", &self.resource_limits)
            .field("progress", &self.progress.is_some())
            .field("observer", &self.observer.is_some())
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// Run-level error
///
/// Every variant except [`ExecutionError::Planning`] carries the results
/// collected before the run stopped.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The batch could not be planned; nothing ran
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanError),

    /// An operation failed while `continue_on_error` was off
    #[error("Operation {operation_id} failed: {message}")]
    OperationFailed {
        /// First failed operation in plan order
        operation_id: OperationId,
        /// Its error message
        message: String,
        /// Results collected so far
        results: Vec<OperationResult>,
    },

    /// A run-level ceiling was crossed between stages
    #[error("Run aborted: {violation}")]
    ResourceLimit {
        /// The crossed ceiling
        violation: LimitViolation,
        /// Results collected so far
        results: Vec<OperationResult>,
    },

    /// The pool refused a submission
    #[error("Worker pool rejected operation {operation_id}: {source}")]
    Rejected {
        /// Refused operation
        operation_id: OperationId,
        /// Why it was refused
        source: PoolError,
        /// Results collected so far
        results: Vec<OperationResult>,
    },
}

impl ExecutionError {
    /// Results collected before the run stopped
    #[must_use]
    pub fn results(&self) -> &[OperationResult] {
        match self {
            Self::Planning(_) => &[],
            Self::OperationFailed { results, .. }
            | Self::ResourceLimit { results, .. }
            | Self::Rejected { results, .. } => results,
        }
    }

    /// Take the collected results
    #[must_use]
    pub fn into_results(self) -> Vec<OperationResult> {
        match self {
            Self::Planning(_) => Vec::new(),
            Self::OperationFailed { results, .. }
            | Self::ResourceLimit { results, .. }
            | Self::Rejected { results, .. } => results,
        }
    }
}

/// Runs operation batches on a shared worker pool
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    pool: WorkerPool,
    planner: OperationPlanner,
}

impl ExecutionEngine {
    /// Create an engine submitting to `pool`
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            planner: OperationPlanner::new(),
        }
    }

    /// The pool this engine submits to
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Plan a batch without running it
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] for duplicate ids or unresolvable dependencies
    pub fn plan(&self, operations: &[Operation]) -> Result<ExecutionPlan, PlanError> {
        self.planner.create_execution_plan(operations)
    }

    /// Plan and run a batch
    ///
    /// Cancellation is not an error: the run stops submitting and returns
    /// the results collected so far.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] when planning fails, when an operation
    /// fails with `continue_on_error` off, when a resource ceiling is
    /// crossed, or when the pool refuses a submission.
    pub async fn execute(
        &self,
        operations: Vec<Operation>,
        options: ExecuteOptions,
    ) -> Result<Vec<OperationResult>, ExecutionError> {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id);
        self.run(run_id, operations, options).instrument(span).await
    }

    async fn run(
        &self,
        run_id: RunId,
        operations: Vec<Operation>,
        options: ExecuteOptions,
    ) -> Result<Vec<OperationResult>, ExecutionError> {
        let plan = self.plan(&operations).map_err(|err| {
            tracing::warn!(error = %err, "planning failed");
            ExecutionError::Planning(err)
        })?;
        drop(operations);

        let monitor = options
            .monitor
            .clone()
            .unwrap_or_else(|| Arc::new(ResourceMonitor::new(options.resource_limits)));
        let width = monitor
            .limits()
            .max_concurrent_operations
            .min(self.pool.capacity())
            .max(1);

        let run = RunContext {
            run_id,
            total: plan.total_operations(),
            completed: AtomicUsize::new(0),
            options: &options,
        };
        let mut results = Vec::with_capacity(run.total);

        tracing::info!(
            operations = run.total,
            stages = plan.stage_count(),
            width,
            "run started"
        );
        run.emit(ExecutionEvent::RunStarted {
            run_id,
            total_operations: run.total,
            stage_count: plan.stage_count(),
        });

        for (index, stage) in plan.stages().iter().enumerate() {
            if options.cancel.is_cancelled() {
                break;
            }
            if let LimitStatus::Exceeded(violation) = monitor.check_limits() {
                tracing::warn!(stage = index, %violation, "resource limit exceeded");
                run.abort(violation.to_string(), results.len());
                return Err(ExecutionError::ResourceLimit { violation, results });
            }

            let lanes = if stage.can_run_in_parallel { width } else { 1 };
            tracing::debug!(stage = index, size = stage.len(), lanes, "stage started");
            run.emit(ExecutionEvent::StageStarted {
                run_id,
                stage: index,
                size: stage.len(),
                parallel: stage.can_run_in_parallel,
            });

            let settled = self.run_stage(stage, lanes, &run).await;

            let mut first_failure = None;
            let mut first_rejection = None;
            let mut failed = 0;
            for (operation_id, outcome) in settled {
                match outcome {
                    Ok(result) => {
                        if result.is_failed() {
                            failed += 1;
                            if first_failure.is_none() {
                                let message = result.error_message().unwrap_or_default().to_string();
                                first_failure = Some((operation_id, message));
                            }
                        }
                        results.push(result);
                    }
                    Err(source) => {
                        if first_rejection.is_none() {
                            first_rejection = Some((operation_id, source));
                        }
                    }
                }
            }
            run.emit(ExecutionEvent::StageCompleted {
                run_id,
                stage: index,
                failed,
            });

            if let Some((operation_id, source)) = first_rejection {
                tracing::warn!(%operation_id, error = %source, "submission rejected");
                run.abort(source.to_string(), results.len());
                return Err(ExecutionError::Rejected {
                    operation_id,
                    source,
                    results,
                });
            }
            if !options.continue_on_error {
                if let Some((operation_id, message)) = first_failure {
                    run.abort(format!("operation {operation_id} failed"), results.len());
                    return Err(ExecutionError::OperationFailed {
                        operation_id,
                        message,
                        results,
                    });
                }
            }
        }

        if options.cancel.is_cancelled() {
            tracing::info!(results = results.len(), "run cancelled");
            run.abort("cancelled".to_string(), results.len());
            return Ok(results);
        }

        tracing::info!(results = results.len(), "run completed");
        run.emit(ExecutionEvent::RunCompleted {
            run_id,
            results: results.len(),
        });
        Ok(results)
    }

    /// Submit a stage with at most `lanes` operations in flight
    ///
    /// Operations skipped because of cancellation produce no entry.
    async fn run_stage(
        &self,
        stage: &ExecutionStage,
        lanes: usize,
        run: &RunContext<'_>,
    ) -> Vec<(OperationId, Result<OperationResult, PoolError>)> {
        let mut settled: Vec<_> = futures::stream::iter(stage.operations.iter().enumerate())
            .map(|(position, operation)| async move {
                let outcome = self.submit(operation, run).await;
                outcome.map(|outcome| (position, operation.id.clone(), outcome))
            })
            .buffer_unordered(lanes)
            .filter_map(futures::future::ready)
            .collect()
            .await;

        settled.sort_by_key(|(position, _, _)| *position);
        settled
            .into_iter()
            .map(|(_, operation_id, outcome)| (operation_id, outcome))
            .collect()
    }

    async fn submit(
        &self,
        operation: &Operation,
        run: &RunContext<'_>,
    ) -> Option<Result<OperationResult, PoolError>> {
        if run.options.cancel.is_cancelled() {
            tracing::debug!(operation_id = %operation.id, "skipped after cancellation");
            return None;
        }

        let on_start = run.options.observer.as_ref().map(|observer| {
            let observer = Arc::clone(observer);
            let event = ExecutionEvent::OperationStarted {
                run_id: run.run_id,
                operation_id: operation.id.clone(),
                kind: operation.kind,
            };
            Box::new(move || observer.on_event(&event)) as StartHook
        });

        let outcome = self
            .pool
            .execute_observed(
                operation.clone(),
                operation.priority,
                run.options.cancel.clone(),
                on_start,
            )
            .await;

        if let Ok(result) = &outcome {
            tracing::debug!(
                operation_id = %result.operation_id,
                status = %result.status,
                duration_ms = result.duration.as_millis() as u64,
                mutating = operation.kind.is_mutating(),
                "operation settled"
            );
            run.settled(result);
        }
        Some(outcome)
    }
}

/// Bookkeeping shared by the futures of one run
struct RunContext<'a> {
    run_id: RunId,
    total: usize,
    completed: AtomicUsize,
    options: &'a ExecuteOptions,
}

impl RunContext<'_> {
    fn emit(&self, event: ExecutionEvent) {
        if let Some(observer) = &self.options.observer {
            observer.on_event(&event);
        }
    }

    fn settled(&self, result: &OperationResult) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let progress = ProgressInfo::new(completed, self.total);

        self.emit(ExecutionEvent::OperationCompleted {
            run_id: self.run_id,
            result: result.clone(),
        });
        if let Some(callback) = &self.options.progress {
            callback(progress);
        }
        self.emit(ExecutionEvent::Progress {
            run_id: self.run_id,
            progress,
        });
    }

    fn abort(&self, reason: String, results: usize) {
        self.emit(ExecutionEvent::RunAborted {
            run_id: self.run_id,
            reason,
            results,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelObserver;
    use crate::handler::handler_fn;
    use crate::pool::PoolConfig;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use strata_core::{OperationError, OperationKind, OperationStatus};

    /// Engine whose handler sleeps `payload.ms` and fails when `payload.fail` is set
    fn engine(config: PoolConfig) -> (ExecutionEngine, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let handler = handler_fn(move |op: Operation, _cancel| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(op.id.as_str().to_string());
                let ms = op.payload["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if op.payload["fail"].as_bool().unwrap_or(false) {
                    return Err(OperationError::new(format!("{} refused", op.id)));
                }
                Ok::<Value, OperationError>(json!({"done": op.id.as_str()}))
            }
        });
        (ExecutionEngine::new(WorkerPool::new(config, handler).unwrap()), seen)
    }

    fn op(id: &str, kind: OperationKind, deps: &[&str]) -> Operation {
        deps.iter()
            .fold(Operation::new(id, kind), |op, dep| op.depends_on(*dep))
    }

    fn ids(results: &[OperationResult]) -> Vec<&str> {
        results.iter().map(|r| r.operation_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_linear_chain_runs_in_order() {
        let (engine, seen) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Analyze, &[]),
            op("b", OperationKind::Edit, &["a"]),
            op("c", OperationKind::Validate, &["b"]),
        ];

        let plan = engine.plan(&ops).unwrap();
        assert_eq!(plan.stage_count(), 3);
        assert!(plan.stages().iter().all(|s| s.len() == 1));

        let results = engine.execute(ops, ExecuteOptions::new()).await.unwrap();
        assert_eq!(ids(&results), vec!["a", "b", "c"]);
        assert!(results.iter().all(OperationResult::is_success));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_parallel_stage_is_faster_than_sequential() {
        let (engine, _) = engine(PoolConfig::new().with_max_workers(3));
        let ops: Vec<Operation> = ["x", "y", "z"]
            .into_iter()
            .map(|id| Operation::new(id, OperationKind::Analyze).with_payload(json!({"ms": 100})))
            .collect();

        let plan = engine.plan(&ops).unwrap();
        assert_eq!(plan.stage_count(), 1);
        assert!(plan.stages()[0].can_run_in_parallel);

        let started = Instant::now();
        let results = engine.execute(ops, ExecuteOptions::new()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(ids(&results), vec!["x", "y", "z"]);
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_everything() {
        let (engine, seen) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Edit, &[]).with_payload(json!({"fail": true})),
            op("b", OperationKind::Validate, &["a"]),
        ];

        let results = engine.execute(ops, ExecuteOptions::new()).await.unwrap();
        assert_eq!(results[0].status, OperationStatus::Failed);
        assert_eq!(results[0].error_message(), Some("a refused"));
        assert!(results[1].is_success());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_later_stages() {
        let (engine, seen) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Edit, &[]).with_payload(json!({"fail": true})),
            op("b", OperationKind::Analyze, &[]),
            op("c", OperationKind::Validate, &["a"]),
        ];

        let err = engine
            .execute(ops, ExecuteOptions::new().with_continue_on_error(false))
            .await
            .unwrap_err();

        match &err {
            ExecutionError::OperationFailed {
                operation_id,
                message,
                ..
            } => {
                assert_eq!(operation_id.as_str(), "a");
                assert_eq!(message, "a refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ids(err.results()), vec!["a", "b"]);
        assert!(!seen.lock().unwrap().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_running() {
        let (engine, seen) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Edit, &["b"]),
            op("b", OperationKind::Edit, &["a"]),
        ];

        let err = engine.execute(ops, ExecuteOptions::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Planning(ref e) if e.is_cyclic()));
        assert!(err.results().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (engine, _) = engine(PoolConfig::default());
        let results = engine.execute(Vec::new(), ExecuteOptions::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_results() {
        let (engine, seen) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Analyze, &[]).with_payload(json!({"ms": 200})),
            op("b", OperationKind::Edit, &["a"]),
            op("c", OperationKind::Validate, &["b"]),
        ];
        let cancel = CancellationToken::new();
        let (observer, mut events) = ChannelObserver::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            }
        };
        let options = ExecuteOptions::new().with_cancel(cancel).with_observer(observer);
        let (outcome, ()) = tokio::join!(engine.execute(ops, options), canceller);

        let results = outcome.unwrap();
        assert_eq!(ids(&results), vec!["a"]);
        assert!(results[0].is_cancelled());
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(ExecutionEvent::RunAborted { ref reason, .. }) if reason == "cancelled"));
    }

    #[tokio::test]
    async fn test_resource_limit_aborts_between_stages() {
        let monitor = Arc::new(ResourceMonitor::new(ResourceLimits::new().with_max_memory_usage(100)));
        let reporter = Arc::clone(&monitor);
        let handler = handler_fn(move |_op: Operation, _cancel| {
            let reporter = Arc::clone(&reporter);
            async move {
                reporter.update_memory_usage(1_000);
                Ok::<Value, OperationError>(Value::Null)
            }
        });
        let engine = ExecutionEngine::new(WorkerPool::new(PoolConfig::default(), handler).unwrap());
        let ops = vec![
            op("a", OperationKind::Analyze, &[]),
            op("b", OperationKind::Edit, &["a"]),
        ];

        let err = engine
            .execute(ops, ExecuteOptions::new().with_monitor(monitor))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::ResourceLimit {
                violation: LimitViolation::Memory { used: 1_000, limit: 100 },
                ..
            }
        ));
        assert!(err.to_string().contains("Memory limit exceeded"));
        assert_eq!(ids(&err.into_results()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rejected_by_stopped_pool() {
        let (engine, _) = engine(PoolConfig::default());
        engine.pool().shutdown(Duration::from_millis(10)).await;

        let err = engine
            .execute(vec![op("a", OperationKind::Create, &[])], ExecuteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Rejected {
                source: PoolError::ShuttingDown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_progress_reported_per_settlement() {
        let (engine, _) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Analyze, &[]),
            op("b", OperationKind::Analyze, &[]),
            op("c", OperationKind::Edit, &["a", "b"]),
            op("d", OperationKind::Validate, &["c"]),
        ];
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        engine
            .execute(
                ops,
                ExecuteOptions::new().with_progress(move |p| sink.lock().unwrap().push(p)),
            )
            .await
            .unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 4);
        let completed: Vec<usize> = reports.iter().map(|p| p.completed_operations).collect();
        assert_eq!(completed, vec![1, 2, 3, 4]);
        assert_eq!(reports[3].percent_complete, 100.0);
        assert!(reports.iter().all(|p| p.total_operations == 4));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (engine, _) = engine(PoolConfig::default());
        let ops = vec![
            op("a", OperationKind::Analyze, &[]),
            op("b", OperationKind::Analyze, &[]),
            op("c", OperationKind::Edit, &["a"]),
        ];
        let (observer, mut receiver) = ChannelObserver::new();

        engine
            .execute(ops, ExecuteOptions::new().with_observer(observer))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::RunStarted {
                total_operations: 3,
                stage_count: 2,
                ..
            })
        ));
        assert!(matches!(events.last(), Some(ExecutionEvent::RunCompleted { results: 3, .. })));
        let count = |pred: fn(&ExecutionEvent) -> bool| events.iter().filter(|e| pred(e)).count();
        assert_eq!(count(|e| matches!(e, ExecutionEvent::OperationStarted { .. })), 3);
        assert_eq!(count(|e| matches!(e, ExecutionEvent::OperationCompleted { .. })), 3);
        assert_eq!(count(|e| matches!(e, ExecutionEvent::StageStarted { .. })), 2);
        assert_eq!(count(|e| matches!(e, ExecutionEvent::StageCompleted { .. })), 2);

        let run_id = events[0].run_id();
        assert!(events.iter().all(|e| e.run_id() == run_id));
    }

    #[tokio::test]
    async fn test_repeat_runs_give_same_ordering() {
        let (engine, _) = engine(PoolConfig::new().with_max_workers(4));
        let ops = vec![
            op("d", OperationKind::Validate, &["b", "c"]),
            op("c", OperationKind::Edit, &["a"]).with_payload(json!({"ms": 5})),
            op("b", OperationKind::Edit, &["a"]).with_payload(json!({"ms": 20, "fail": true})),
            op("a", OperationKind::Analyze, &[]),
            op("e", OperationKind::Create, &[]).with_payload(json!({"ms": 1})),
        ];

        let first = engine.execute(ops.clone(), ExecuteOptions::new()).await.unwrap();
        let second = engine.execute(ops, ExecuteOptions::new()).await.unwrap();

        let summary = |results: &[OperationResult]| -> Vec<(String, OperationStatus)> {
            results
                .iter()
                .map(|r| (r.operation_id.as_str().to_string(), r.status))
                .collect()
        };
        assert_eq!(summary(&first), summary(&second));
        assert_eq!(ids(&first), vec!["a", "e", "c", "b", "d"]);
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_limits() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handler_fn(move |_op: Operation, _cancel| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<Value, OperationError>(Value::Null)
                }
            })
        };
        let engine = ExecutionEngine::new(WorkerPool::new(PoolConfig::new().with_max_workers(8), handler).unwrap());
        let ops: Vec<Operation> = (0..12)
            .map(|i| Operation::new(format!("op{i}"), OperationKind::Analyze))
            .collect();

        let options = ExecuteOptions::new()
            .with_resource_limits(ResourceLimits::new().with_max_concurrent_operations(2));
        let results = engine.execute(ops, options).await.unwrap();

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
