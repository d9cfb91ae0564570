//! Fan-out worker pool for a single stage.
//!
//! The pool only manages worker lifetimes. Callers hand each worker clones of
//! the stage's shared input and output, keep one output handle themselves,
//! and close it after [`WorkerPool::run`] returns. Since `run` returns only
//! after every worker has, the output closes exactly once and never early.

use crate::errors::{PipelineError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// N parallel workers bound to one stage.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    stage: String,
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool of `workers` workers for `stage`.
    pub fn new(stage: impl Into<String>, workers: usize) -> Result<Self> {
        let stage = stage.into();
        if workers == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "stage '{stage}' needs at least one worker"
            )));
        }
        Ok(Self { stage, workers })
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the fan-out degree.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns one task per worker slot and waits for all of them.
    ///
    /// `worker` is called with the slot index. Returns the first error in
    /// completion order; a panicking worker is reported as
    /// [`PipelineError::WorkerPanicked`].
    pub async fn run<F, Fut>(&self, worker: F) -> Result<()>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for id in 0..self.workers {
            set.spawn(worker(id));
        }
        debug!(stage = %self.stage, workers = self.workers, "Worker pool started");

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|join_error| {
                Err(PipelineError::WorkerPanicked {
                    stage: self.stage.clone(),
                    detail: join_error.to_string(),
                })
            });

            if let Err(error) = outcome {
                if first_error.is_none() {
                    warn!(stage = %self.stage, error = %error, "Worker failed");
                    first_error = Some(error);
                } else {
                    debug!(stage = %self.stage, error = %error, "Worker failed after an earlier error");
                }
            }
        }

        debug!(stage = %self.stage, "All workers finished");
        first_error.map_or(Ok(()), Err)
    }
}
