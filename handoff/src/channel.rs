//! Hand-off channels between adjacent stages.
//!
//! A channel is bounded and unidirectional. The sending side closes when its
//! last [`StageSender`] is dropped or closed; receivers then drain whatever is
//! still buffered and observe `None`. Closure carries no error meaning.

use crate::errors::{PipelineError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Smallest capacity tokio's bounded channel supports. A send waits while the
/// single slot is occupied, which keeps producers in step with consumers.
pub const DEFAULT_HANDOFF_CAPACITY: usize = 1;

/// Creates a bounded channel owned by `stage` (the producing stage).
///
/// A capacity of zero is raised to one.
#[must_use]
pub fn stage_channel<T>(stage: impl Into<String>, capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stage: Arc<str> = Arc::from(stage.into());
    (
        StageSender {
            stage: stage.clone(),
            inner: tx,
        },
        StageReceiver { stage, inner: rx },
    )
}

/// The producing half of a stage channel.
///
/// Clones share the channel; it closes once every clone is gone.
#[derive(Debug)]
pub struct StageSender<T> {
    stage: Arc<str>,
    inner: mpsc::Sender<T>,
}

impl<T> Clone for StageSender<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> StageSender<T> {
    /// Sends a value, waiting for room in the channel.
    ///
    /// Fails with [`PipelineError::ChannelClosed`] when no receiver is left.
    pub async fn send(&self, value: T) -> Result<()> {
        self.inner
            .send(value)
            .await
            .map_err(|_| PipelineError::channel_closed(self.stage.as_ref()))
    }

    /// Releases this handle. The channel closes when the last handle goes.
    pub fn close(self) {
        trace!(stage = %self.stage, "Releasing stage sender");
    }
}

/// The consuming half of a stage channel, for a single consumer.
#[derive(Debug)]
pub struct StageReceiver<T> {
    stage: Arc<str>,
    inner: mpsc::Receiver<T>,
}

impl<T> StageReceiver<T> {
    /// Receives the next value, or `None` once the channel is closed and empty.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.inner.recv().await;
        if item.is_none() {
            trace!(stage = %self.stage, "Stage channel drained");
        }
        item
    }

    /// Turns this receiver into one that several workers can pull from.
    #[must_use]
    pub fn into_shared(self) -> SharedReceiver<T> {
        SharedReceiver {
            stage: self.stage,
            inner: Arc::new(Mutex::new(self.inner)),
        }
    }
}

/// A receiver shared by the workers of a fanned-out stage.
///
/// Each value goes to exactly one worker; which one is unspecified.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    stage: Arc<str>,
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> SharedReceiver<T> {
    /// Receives the next value, or `None` once the channel is closed and empty.
    ///
    /// Cancel safe: dropping the future before it completes loses no value.
    pub async fn recv(&self) -> Option<T> {
        let item = self.inner.lock().await.recv().await;
        if item.is_none() {
            trace!(stage = %self.stage, "Shared stage channel drained");
        }
        item
    }
}
