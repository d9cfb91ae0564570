//! Shared cancellation scope for one pipeline run.

use crate::errors::PipelineError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A callback invoked with the first recorded error.
pub type CancelCallback = Box<dyn Fn(&PipelineError) + Send + Sync>;

/// Done signal and first-error cell shared by every stage of a run.
///
/// Recording an error is idempotent: only the first one is kept, and it
/// cancels the scope. Every worker races its blocking operations against
/// [`CancellationScope::cancelled`].
pub struct CancellationScope {
    /// Fast-path flag, set after the error is stored.
    cancelled: AtomicBool,
    /// The first recorded error.
    first_error: RwLock<Option<PipelineError>>,
    /// Broadcast done signal.
    done: watch::Sender<bool>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<CancelCallback>>,
}

impl CancellationScope {
    /// Creates a new, live scope.
    #[must_use]
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            cancelled: AtomicBool::new(false),
            first_error: RwLock::new(None),
            done,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Records `error` and cancels the scope, unless an error is already
    /// recorded. Returns true if this call was the first.
    pub fn fail(&self, error: PipelineError) -> bool {
        {
            let mut slot = self.first_error.write();
            if slot.is_some() {
                debug!(error = %error, "Scope already cancelled, discarding error");
                return false;
            }
            *slot = Some(error.clone());
        }

        self.cancelled.store(true, Ordering::SeqCst);
        self.done.send_replace(true);
        debug!(error = %error, "Scope cancelled");

        let callbacks = self.callbacks.read();
        for callback in callbacks.iter() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&error);
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        }
        true
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&PipelineError) + Send + Sync + 'static,
    {
        // Holding the write lock while checking keeps `fail` from running the
        // callback list between the check and the push.
        let mut callbacks = self.callbacks.write();
        if let Some(error) = self.error() {
            drop(callbacks);
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&error);
            })) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether the scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the first recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<PipelineError> {
        self.first_error.read().clone()
    }

    /// Completes once the scope is cancelled. Returns immediately if it
    /// already is.
    ///
    /// The done sender is owned by the scope, so the wait only ends on
    /// cancellation.
    pub async fn cancelled(&self) {
        let mut rx = self.done.subscribe();
        if rx.wait_for(|done| *done).await.is_err() {
            debug!("Scope done signal closed");
        }
    }

    /// Builds the error a stage returns when it abandons work because of
    /// this scope.
    #[must_use]
    pub fn cancellation_error(&self, stage: &str) -> PipelineError {
        let reason = self
            .error()
            .map_or_else(|| "cancelled".to_string(), |e| e.to_string());
        PipelineError::cancelled(stage, reason)
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationScope")
            .field("cancelled", &self.is_cancelled())
            .field("error", &self.error())
            .finish()
    }
}
