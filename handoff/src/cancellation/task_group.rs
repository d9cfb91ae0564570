//! Group of stage tasks sharing one cancellation scope.

use super::CancellationScope;
use crate::errors::{PipelineError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Extracts the message from a caught panic payload.
#[must_use]
pub fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

/// A group of related tasks with first-error cancellation.
///
/// A task's error is recorded in the scope as soon as the task returns it,
/// so the other tasks observe cancellation without waiting for the join.
pub struct TaskGroup {
    /// The scope shared by every task in the group.
    scope: Arc<CancellationScope>,
    /// Handles to spawned tasks, with their names.
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskGroup {
    /// Creates a new group with a fresh scope.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scope(Arc::new(CancellationScope::new()))
    }

    /// Creates a group over an existing scope.
    #[must_use]
    pub fn with_scope(scope: Arc<CancellationScope>) -> Self {
        Self {
            scope,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the group's scope.
    #[must_use]
    pub fn scope(&self) -> &Arc<CancellationScope> {
        &self.scope
    }

    /// Spawns a task in the group.
    ///
    /// An `Err` or a panic from the task is recorded in the scope.
    pub fn spawn<F, Fut>(&self, name: &str, task: F)
    where
        F: FnOnce(Arc<CancellationScope>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = self.scope.clone();
        let fut = task(scope.clone());
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(PipelineError::WorkerPanicked {
                    stage: task_name.clone(),
                    detail: panic_detail(panic.as_ref()),
                }),
            };

            match outcome {
                Ok(()) => debug!(task = %task_name, "Task finished"),
                Err(error) => {
                    if scope.fail(error.clone()) {
                        warn!(task = %task_name, error = %error, "Task failed, cancelling group");
                    } else {
                        debug!(task = %task_name, error = %error, "Task stopped after cancellation");
                    }
                }
            }
        });

        self.handles.lock().push((name.to_string(), handle));
    }

    /// Cancels every task in the group with `error`.
    pub fn cancel_all(&self, error: PipelineError) {
        self.scope.fail(error);
    }

    /// Waits for every spawned task to finish and returns the first recorded
    /// error.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                break;
            }

            for (name, handle) in handles {
                if let Err(join_error) = handle.await {
                    self.scope.fail(PipelineError::WorkerPanicked {
                        stage: name,
                        detail: join_error.to_string(),
                    });
                }
            }
        }

        self.scope.error().map_or(Ok(()), Err)
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}
