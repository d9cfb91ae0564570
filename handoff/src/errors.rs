//! Error types for handoff pipelines.
//!
//! There is one business kind, [`PipelineError::StageFailure`]. The other
//! variants describe how the execution core itself gave up on a stage.

use thiserror::Error;

/// Message carried by synthetic stage failures.
pub const SYNTHETIC_FAILURE_MESSAGE: &str = "Some error";

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The main error type for pipeline runs.
///
/// Errors are `Clone` because drain-and-carry pipelines move them through
/// channels as data, and the cancellation scope hands out copies of the
/// first recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A stage failed while doing its work.
    #[error("stage '{stage}' failed: {message}")]
    StageFailure {
        /// The stage that produced the failure.
        stage: String,
        /// Human readable description.
        message: String,
    },

    /// A stage abandoned its work because the run was cancelled.
    #[error("stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: String,
        /// The cause recorded by the cancellation scope.
        reason: String,
    },

    /// Every receiver of a stage's output went away.
    #[error("output channel of stage '{stage}' is closed")]
    ChannelClosed {
        /// The stage whose send failed.
        stage: String,
    },

    /// A pool worker panicked or was aborted.
    #[error("worker of stage '{stage}' did not finish: {detail}")]
    WorkerPanicked {
        /// The stage owning the worker.
        stage: String,
        /// The join error description.
        detail: String,
    },

    /// The pipeline configuration is not usable.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Creates a stage failure.
    #[must_use]
    pub fn stage_failure(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates the synthetic failure used by failure triggers.
    #[must_use]
    pub fn synthetic(stage: impl Into<String>) -> Self {
        Self::stage_failure(stage, SYNTHETIC_FAILURE_MESSAGE)
    }

    /// Creates a cancellation error for `stage`.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates a closed-channel error for `stage`.
    #[must_use]
    pub fn channel_closed(stage: impl Into<String>) -> Self {
        Self::ChannelClosed {
            stage: stage.into(),
        }
    }

    /// Returns true if this error is a consequence of cancellation rather
    /// than an original failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the stage the error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailure { stage, .. }
            | Self::Cancelled { stage, .. }
            | Self::ChannelClosed { stage }
            | Self::WorkerPanicked { stage, .. } => Some(stage),
            Self::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_failure_message() {
        let err = PipelineError::synthetic("mediator");
        assert!(err.to_string().contains(SYNTHETIC_FAILURE_MESSAGE));
        assert_eq!(err.stage(), Some("mediator"));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_cancelled_display() {
        let err = PipelineError::cancelled("source", "stage 'mediator' failed: Some error");
        assert!(err.is_cancellation());
        assert_eq!(
            err.to_string(),
            "stage 'source' cancelled: stage 'mediator' failed: Some error"
        );
    }

    #[test]
    fn test_invalid_config_has_no_stage() {
        let err = PipelineError::InvalidConfig("workers must be at least 1".into());
        assert_eq!(err.stage(), None);
    }
}
