//! The in-band item carried by drain-and-carry channels.

use crate::errors::PipelineError;

/// A channel value that holds either a payload or a failure.
///
/// Exactly one of the two is present. A stream carries at most one terminal
/// failure from its source, but mediators may add their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineItem<T> {
    /// A successfully produced payload.
    Value(T),
    /// A failure travelling downstream as data.
    Failure(PipelineError),
}

impl<T> PipelineItem<T> {
    /// Returns true if this item carries a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the payload, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<T, PipelineError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Failure(err) => Err(err),
        }
    }

    /// Maps the payload, leaving failures untouched.
    pub fn map<U, F>(self, f: F) -> PipelineItem<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Value(value) => PipelineItem::Value(f(value)),
            Self::Failure(err) => PipelineItem::Failure(err),
        }
    }

    /// Applies a fallible step to the payload. An `Err` becomes a failure item.
    pub fn and_then<U, F>(self, f: F) -> PipelineItem<U>
    where
        F: FnOnce(T) -> Result<U, PipelineError>,
    {
        match self {
            Self::Value(value) => f(value).into(),
            Self::Failure(err) => PipelineItem::Failure(err),
        }
    }
}

impl<T> From<Result<T, PipelineError>> for PipelineItem<T> {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(err) => Self::Failure(err),
        }
    }
}
