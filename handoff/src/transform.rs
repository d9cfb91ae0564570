//! Pluggable per-item work and failure triggers.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// Per-item work done by a mediator.
///
/// Implementations must be cheap to share: one instance serves every worker
/// of a stage.
pub trait Transform<I>: Send + Sync {
    /// The produced item type.
    type Output;

    /// Transforms one input item.
    fn apply(&self, input: I) -> Result<Self::Output>;
}

/// Formats the input with `Display`. The default mediator work.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToStringTransform;

impl<I: Display> Transform<I> for ToStringTransform {
    type Output = String;

    fn apply(&self, input: I) -> Result<String> {
        Ok(input.to_string())
    }
}

/// A closure-based transform.
pub struct FnTransform<F> {
    func: F,
}

impl<F> FnTransform<F> {
    /// Wraps `func`.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform").finish_non_exhaustive()
    }
}

impl<I, O, F> Transform<I> for FnTransform<F>
where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    type Output = O;

    fn apply(&self, input: I) -> Result<O> {
        (self.func)(input)
    }
}

/// Where an injected failure happens in a run.
///
/// Drain-and-carry sources fail right after emitting the value equal to the
/// trigger. Cancel-on-first-error mediators fail right after forwarding a
/// value past it.
/// Negative triggers never match a value but are exceeded by every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureTrigger {
    at: Option<i64>,
}

impl FailureTrigger {
    /// A trigger that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self { at: None }
    }

    /// A trigger at `at`.
    #[must_use]
    pub const fn at(at: i64) -> Self {
        Self { at: Some(at) }
    }

    /// Returns the configured trigger value.
    #[must_use]
    pub const fn value(&self) -> Option<i64> {
        self.at
    }

    /// Returns true if `value` is exactly the trigger.
    #[must_use]
    pub fn matches(&self, value: u64) -> bool {
        self.at
            .and_then(|at| u64::try_from(at).ok())
            .is_some_and(|at| at == value)
    }

    /// Returns true if `value` lies past the trigger.
    #[must_use]
    pub fn is_exceeded_by(&self, value: u64) -> bool {
        self.at
            .is_some_and(|at| u64::try_from(at).map_or(true, |at| value > at))
    }
}

impl From<Option<i64>> for FailureTrigger {
    fn from(at: Option<i64>) -> Self {
        Self { at }
    }
}
