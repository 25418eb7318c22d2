//! Deferred task dispatch.
//!
//! A task is a persisted [`Entity`] of kind [`EntityKind::Task`]. The
//! executor loads it, hands it to the first registered handler that accepts
//! it, and removes the record once a handler reports completion.
//!
//! ## Retry policy
//!
//! - A handler error, a panic, or a missing task record is retried after
//!   `retry_delay * attempt`, up to `max_attempts` attempts in total
//! - A handler returning `Ok(false)` declines the task: it is logged and not
//!   retried, and the record stays in place
//! - A record that is not a task fails immediately
//!
//! After the last attempt fails the record also stays in place, so a later
//! sweep can pick it up.

mod cleanup;

pub use cleanup::TableCleanupTaskHandler;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::observability::task_span;
use strata_core::{CallContext, Entity, EntityId, EntityKind};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::CatalogConfig;
use crate::error::{CatalogError, CatalogResult, poisoned};
use crate::metrics;
use crate::persistence::EntityStore;

/// Executes one kind of deferred task.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    /// Returns true if this handler accepts `task`.
    fn can_handle(&self, task: &Entity) -> bool;

    /// Runs `task`.
    ///
    /// Returns `Ok(true)` when the task is done and its record can be
    /// removed, and `Ok(false)` when the handler declines it for good.
    ///
    /// # Errors
    ///
    /// Any error makes the executor retry the task.
    async fn handle(&self, task: &Entity, ctx: &CallContext) -> CatalogResult<bool>;
}

/// Final outcome of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A handler completed the task and the record was removed.
    Completed,
    /// A handler declined the task.
    Declined,
    /// No registered handler accepts the task.
    NoHandler,
}

impl TaskOutcome {
    /// Label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::NoHandler => "no_handler",
        }
    }
}

/// Handle to a dispatched task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: EntityId,
    join: JoinHandle<CatalogResult<TaskOutcome>>,
}

impl TaskHandle {
    /// Id of the dispatched task.
    #[must_use]
    pub const fn task_id(&self) -> EntityId {
        self.task_id
    }

    /// True once every attempt has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt, or
    /// [`CatalogError::Internal`] if the dispatch loop was aborted.
    pub async fn wait(self) -> CatalogResult<TaskOutcome> {
        let task_id = self.task_id;
        self.join.await.map_err(|e| CatalogError::Internal {
            message: format!("task {task_id} dispatch aborted: {e}"),
        })?
    }
}

struct AttemptFailure {
    error: CatalogError,
    retryable: bool,
}

impl AttemptFailure {
    const fn retryable(error: CatalogError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    const fn fatal(error: CatalogError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Dispatches deferred tasks to registered handlers.
pub struct TaskExecutor {
    store: Arc<dyn EntityStore>,
    handlers: RwLock<Vec<Arc<dyn TaskHandler>>>,
    permits: Arc<Semaphore>,
    retry_delay: Duration,
    max_attempts: u32,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("retry_delay", &self.retry_delay)
            .field("max_attempts", &self.max_attempts)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Creates an executor with no handlers.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: &CatalogConfig) -> Self {
        Self {
            store,
            handlers: RwLock::new(Vec::new()),
            permits: Arc::new(Semaphore::new(config.task_worker_concurrency.max(1))),
            retry_delay: config.task_retry_delay,
            max_attempts: config.task_max_attempts.max(1),
        }
    }

    /// Registers a handler. Handlers are consulted in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler list lock is poisoned.
    pub fn add_handler(&self, handler: Arc<dyn TaskHandler>) -> CatalogResult<()> {
        tracing::debug!(handler = handler.name(), "registering task handler");
        self.handlers.write().map_err(|_| poisoned())?.push(handler);
        Ok(())
    }

    /// Names of registered handlers, in consultation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler list lock is poisoned.
    pub fn handler_names(&self) -> CatalogResult<Vec<&'static str>> {
        Ok(self
            .handlers
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .map(|h| h.name())
            .collect())
    }

    /// Schedules task `task_id` to run in the background under a copy of
    /// `ctx`. Must be called from within a Tokio runtime.
    #[must_use = "dropping the handle detaches the task"]
    pub fn dispatch(self: &Arc<Self>, task_id: EntityId, ctx: &CallContext) -> TaskHandle {
        let executor = Arc::clone(self);
        let ctx = ctx.detached();
        let join = tokio::spawn(async move { executor.run(task_id, ctx).await });
        TaskHandle { task_id, join }
    }

    async fn run(self: Arc<Self>, task_id: EntityId, ctx: CallContext) -> CatalogResult<TaskOutcome> {
        let mut attempt: u32 = 1;
        loop {
            let executor = Arc::clone(&self);
            let attempt_ctx = ctx.clone();
            let span = task_span(task_id.get(), ctx.realm.as_str(), attempt);
            let joined = tokio::spawn(
                async move { executor.attempt(task_id, &attempt_ctx).await }.instrument(span),
            )
            .await;

            let failure = match joined {
                Ok(Ok(outcome)) => {
                    metrics::record_task_attempt(outcome.as_str());
                    return Ok(outcome);
                }
                Ok(Err(failure)) => failure,
                Err(join_error) => AttemptFailure::retryable(CatalogError::Internal {
                    message: format!("task handler panicked: {join_error}"),
                }),
            };
            metrics::record_task_attempt("failed");

            if !failure.retryable || attempt >= self.max_attempts {
                tracing::error!(
                    %task_id,
                    attempt,
                    retryable = failure.retryable,
                    error = %failure.error,
                    "task failed; leaving record in place"
                );
                return Err(failure.error);
            }

            let delay = self.retry_delay.saturating_mul(attempt);
            tracing::warn!(%task_id, attempt, ?delay, error = %failure.error, "task attempt failed; retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, task_id: EntityId, ctx: &CallContext) -> Result<TaskOutcome, AttemptFailure> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| {
                AttemptFailure::fatal(CatalogError::Internal {
                    message: "task executor shut down".into(),
                })
            })?;

        let task = self
            .store
            .load_by_id(EntityId::ROOT, task_id)
            .await
            .map_err(AttemptFailure::retryable)?
            .ok_or_else(|| AttemptFailure::retryable(CatalogError::entity_not_found(format!("task {task_id}"))))?;
        if task.kind != EntityKind::Task {
            return Err(AttemptFailure::fatal(CatalogError::BadRequest {
                message: format!("entity {task_id} is a {}, not a task", task.kind),
            }));
        }

        let handler = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| AttemptFailure::fatal(poisoned()))?;
            handlers.iter().find(|h| h.can_handle(&task)).cloned()
        };
        let Some(handler) = handler else {
            tracing::warn!(%task_id, name = %task.name, "no handler accepts task");
            return Ok(TaskOutcome::NoHandler);
        };

        match handler.handle(&task, ctx).await {
            Ok(true) => {
                let dropped = self
                    .store
                    .drop_if_exists(&[], &task, None, false)
                    .await
                    .map_err(AttemptFailure::retryable)?;
                if !dropped.is_success() {
                    tracing::debug!(%task_id, status = ?dropped.status, "task record already gone");
                }
                tracing::info!(%task_id, handler = handler.name(), "task completed");
                Ok(TaskOutcome::Completed)
            }
            Ok(false) => {
                tracing::warn!(%task_id, handler = handler.name(), "handler declined task");
                Ok(TaskOutcome::Declined)
            }
            Err(e) => Err(AttemptFailure::retryable(e)),
        }
    }
}
