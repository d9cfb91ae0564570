//! Execution strategies.
//!
//! Both strategies run the same source -> mediator -> sink line but with
//! incompatible draining contracts, so each owns its own stage functions:
//!
//! - [`drain`]: errors travel in-band and every stage reads its input to the end
//! - [`cancel`]: the first error cancels a shared scope and every stage exits early

pub mod cancel;
pub mod drain;

pub use cancel::CancelOnFirstError;
pub use drain::DrainAndCarry;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::events::{EventSink, NoOpEventSink};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Name of the source stage.
pub const SOURCE_STAGE: &str = "source";
/// Name of the fanned-out mediator stage.
pub const MEDIATOR_STAGE: &str = "mediator";
/// Name of the sink stage.
pub const SINK_STAGE: &str = "sink";

/// What a run produced.
///
/// `results` holds every value the sink saw, in arrival order. When `error`
/// is set the results may be incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome<T> {
    /// Values collected by the sink.
    pub results: Vec<T>,
    /// The error reported for the run, if any.
    pub error: Option<PipelineError>,
}

impl<T> RunOutcome<T> {
    /// An outcome with no results and `error`.
    #[must_use]
    pub const fn failed(error: PipelineError) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error),
        }
    }

    /// Returns true if no error was reported.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, discarding partial results on error.
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.error {
            None => Ok(self.results),
            Some(error) => Err(error),
        }
    }
}

/// Per-run data handed to a strategy.
#[derive(Clone)]
pub struct RunContext {
    /// Identifier of this run.
    pub run_id: Uuid,
    /// Where lifecycle events go.
    pub events: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a context with a fresh run id.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            events,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// One error-propagation discipline for a source -> mediator -> sink run.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// The value type collected by the sink.
    type Output: Send + 'static;

    /// Returns a stable name for logs and events.
    fn name(&self) -> &'static str;

    /// Runs the pipeline described by `config`.
    ///
    /// `config` has already been validated.
    async fn execute(&self, config: &PipelineConfig, run: &RunContext) -> RunOutcome<Self::Output>;
}
