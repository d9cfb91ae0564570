//! Run lifecycle events.
//!
//! Pipelines report `pipeline.started`, `pipeline.completed`,
//! `pipeline.failed` and `scope.cancelled` to an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted when a run starts.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Event emitted when a run ends without error.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// Event emitted when a run ends with an error.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// Event emitted when a cancellation scope records its first error.
pub const SCOPE_CANCELLED: &str = "scope.cancelled";
