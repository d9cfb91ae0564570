//! Cancellation for cancel-on-first-error runs.
//!
//! This module provides:
//! - `CancellationScope`: a set-once error cell plus a broadcast done signal
//! - `TaskGroup`: spawns stage tasks into one scope and joins them

mod scope;
mod task_group;

pub use scope::{CancelCallback, CancellationScope};
pub use task_group::{panic_detail, TaskGroup};
