//! # Handoff
//!
//! Concurrent source -> mediator -> sink pipelines over bounded hand-off
//! channels, with a fanned-out mediator stage.
//!
//! Two error disciplines are available and deliberately kept apart:
//!
//! - **Drain-and-carry**: errors travel downstream as data and every stage
//!   reads its input until it closes. Nothing is cancelled; nothing leaks.
//! - **Cancel-on-first-error**: the first error cancels a shared scope; every
//!   stage races its sends and receives against cancellation and exits early.
//!
//! Either way a run returns every value the sink collected plus at most one
//! error.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use handoff::prelude::*;
//!
//! let outcome = run_drain_and_carry(5, 1, 2).await;
//! assert_eq!(outcome.results.len(), 2);
//! assert!(outcome.error.is_some());
//!
//! let pipeline = Pipeline::new(PipelineConfig::new().with_item_count(10).with_workers(4));
//! let outcome = pipeline.run(&CancelOnFirstError::new()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod channel;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationScope, TaskGroup};
    pub use crate::channel::{stage_channel, SharedReceiver, StageReceiver, StageSender};
    pub use crate::config::PipelineConfig;
    pub use crate::core::PipelineItem;
    pub use crate::errors::{PipelineError, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{run_cancel_on_first_error, run_drain_and_carry, Pipeline};
    pub use crate::policy::{
        CancelOnFirstError, DrainAndCarry, ExecutionStrategy, RunContext, RunOutcome,
    };
    pub use crate::pool::WorkerPool;
    pub use crate::transform::{FailureTrigger, FnTransform, ToStringTransform, Transform};
}
