//! Execution routines for operations.
//!
//! The runtime never interprets payloads; it only schedules calls into an
//! [`OperationHandler`]. A production assembly registers one handler per
//! operation kind (with path validation, caching, and so on wired inside)
//! and injects the resulting [`HandlerRegistry`] into the worker pool.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use strata_core::{Operation, OperationError, OperationKind};
use tokio_util::sync::CancellationToken;

/// Routine that performs one operation
///
/// Implementations should watch `cancel` and return promptly once it fires;
/// the pool stops waiting on timeout or cancellation either way.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Perform the operation, returning its success payload
    async fn perform(
        &self,
        operation: &Operation,
        cancel: CancellationToken,
    ) -> Result<Value, OperationError>;
}

#[async_trait]
impl<H: OperationHandler + ?Sized> OperationHandler for Arc<H> {
    async fn perform(
        &self,
        operation: &Operation,
        cancel: CancellationToken,
    ) -> Result<Value, OperationError> {
        (**self).perform(operation, cancel).await
    }
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`OperationHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Operation, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(Operation, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    async fn perform(
        &self,
        operation: &Operation,
        cancel: CancellationToken,
    ) -> Result<Value, OperationError> {
        (self.f)(operation.clone(), cancel).await
    }
}

/// Routes operations to a handler by kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<OperationKind, Arc<dyn OperationHandler>>,
    fallback: Option<Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one kind, replacing any previous one
    #[must_use]
    pub fn with_handler(mut self, kind: OperationKind, handler: impl OperationHandler + 'static) -> Self {
        self.register(kind, Arc::new(handler));
        self
    }

    /// Handler used for kinds without a dedicated one
    #[must_use]
    pub fn with_fallback(mut self, handler: impl OperationHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Register the handler for one kind; returns the one it replaced
    pub fn register(
        &mut self,
        kind: OperationKind,
        handler: Arc<dyn OperationHandler>,
    ) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.insert(kind, handler)
    }

    /// Handler that would run an operation of this kind
    #[must_use]
    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers
            .get(&kind)
            .or(self.fallback.as_ref())
            .map(Arc::clone)
    }

    /// Whether some handler covers this kind
    #[must_use]
    pub fn contains(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind) || self.fallback.is_some()
    }

    /// Kinds with a dedicated handler
    #[must_use]
    pub fn kinds(&self) -> Vec<OperationKind> {
        self.handlers.keys().copied().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl OperationHandler for HandlerRegistry {
    async fn perform(
        &self,
        operation: &Operation,
        cancel: CancellationToken,
    ) -> Result<Value, OperationError> {
        match self.get(operation.kind) {
            Some(handler) => handler.perform(operation, cancel).await,
            None => Err(OperationError::with_code(
                format!("No handler registered for {} operations", operation.kind),
                OperationError::NO_HANDLER,
            )),
        }
    }
}
