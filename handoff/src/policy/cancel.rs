//! Cancel-on-first-error execution.
//!
//! Errors are control flow. Every stage runs inside one [`TaskGroup`]; the
//! first error recorded in its [`CancellationScope`] cancels the run. Every
//! blocking send and receive is raced against the scope's done signal, so no
//! worker stays blocked after cancellation, and nothing is drained.

use super::{ExecutionStrategy, RunContext, RunOutcome, MEDIATOR_STAGE, SINK_STAGE, SOURCE_STAGE};
use crate::cancellation::{panic_detail, CancellationScope, TaskGroup};
use crate::channel::{stage_channel, SharedReceiver, StageReceiver, StageSender};
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::events::SCOPE_CANCELLED;
use crate::pool::WorkerPool;
use crate::transform::{FailureTrigger, ToStringTransform, Transform};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Emits `1..=item_count`, checking for cancellation before each send.
pub fn source(group: &TaskGroup, item_count: u64, capacity: usize) -> StageReceiver<u64> {
    let (tx, rx) = stage_channel(SOURCE_STAGE, capacity);

    group.spawn(SOURCE_STAGE, move |scope| async move {
        for n in 1..=item_count {
            tokio::select! {
                biased;
                () = scope.cancelled() => {
                    debug!(stage = SOURCE_STAGE, next = n, "Source cancelled");
                    return Err(scope.cancellation_error(SOURCE_STAGE));
                }
                sent = tx.send(n) => sent?,
            }
        }
        tx.close();
        debug!(stage = SOURCE_STAGE, "Source finished");
        Ok(())
    });

    rx
}

/// Runs `pool` over `input`. Each worker transforms and forwards every value,
/// then fails once the value it just forwarded lies past `trigger`.
///
/// A worker's error or panic reaches the scope as soon as the worker stops,
/// which cancels its siblings and the other stages. The output closes after
/// the last worker is gone.
pub fn mediator<T>(
    group: &TaskGroup,
    pool: WorkerPool,
    trigger: FailureTrigger,
    transform: Arc<T>,
    input: StageReceiver<u64>,
    capacity: usize,
) -> StageReceiver<T::Output>
where
    T: Transform<u64> + ?Sized + 'static,
    T::Output: Send + 'static,
{
    let stage = pool.stage().to_string();
    let (tx, rx) = stage_channel(stage.clone(), capacity);
    let input = input.into_shared();

    group.spawn(&stage, move |scope| async move {
        let result = pool
            .run(|worker| {
                let input = input.clone();
                let output = tx.clone();
                let transform = transform.clone();
                let scope = scope.clone();
                let stage = pool.stage().to_string();

                async move {
                    let result = AssertUnwindSafe(mediate(
                        &stage,
                        worker,
                        &scope,
                        trigger,
                        transform.as_ref(),
                        &input,
                        &output,
                    ))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(PipelineError::WorkerPanicked {
                            stage: stage.clone(),
                            detail: panic_detail(panic.as_ref()),
                        })
                    });
                    if let Err(error) = &result {
                        scope.fail(error.clone());
                    }
                    result
                }
            })
            .await;
        drop(input);
        tx.close();
        debug!(stage = %pool.stage(), "Mediator finished");
        result
    });

    rx
}

/// The receive -> transform -> send loop of one mediator worker.
async fn mediate<T>(
    stage: &str,
    worker: usize,
    scope: &CancellationScope,
    trigger: FailureTrigger,
    transform: &T,
    input: &SharedReceiver<u64>,
    output: &StageSender<T::Output>,
) -> Result<()>
where
    T: Transform<u64> + ?Sized,
{
    loop {
        let received = tokio::select! {
            biased;
            () = scope.cancelled() => return Err(scope.cancellation_error(stage)),
            item = input.recv() => item,
        };
        let Some(value) = received else {
            return Ok(());
        };

        let transformed = transform.apply(value)?;
        tokio::select! {
            biased;
            () = scope.cancelled() => return Err(scope.cancellation_error(stage)),
            sent = output.send(transformed) => sent?,
        }

        if trigger.is_exceeded_by(value) {
            warn!(stage, worker, value, "Failure trigger reached");
            return Err(PipelineError::synthetic(stage));
        }
    }
}

/// Collects values until the input closes or the run is cancelled, then
/// joins the group and reports its first error.
///
/// Values already waiting in the channel are taken before cancellation is
/// noticed.
pub async fn sink<T>(group: &TaskGroup, mut input: StageReceiver<T>) -> RunOutcome<T> {
    let scope = group.scope().clone();
    let mut results = Vec::new();

    loop {
        tokio::select! {
            biased;
            item = input.recv() => match item {
                Some(value) => results.push(value),
                None => break,
            },
            () = scope.cancelled() => {
                debug!(stage = SINK_STAGE, collected = results.len(), "Sink cancelled");
                break;
            }
        }
    }
    drop(input);

    let error = group.wait().await.err();
    RunOutcome { results, error }
}

/// The cancel-on-first-error strategy.
///
/// `config.fail_at` is a threshold: a mediator worker fails right after
/// forwarding a value greater than it.
#[derive(Debug)]
pub struct CancelOnFirstError<T = ToStringTransform> {
    transform: Arc<T>,
}

impl CancelOnFirstError {
    /// Creates the strategy with the default to-string transform.
    #[must_use]
    pub fn new() -> Self {
        Self::with_transform(ToStringTransform)
    }
}

impl Default for CancelOnFirstError {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CancelOnFirstError<T> {
    /// Creates the strategy with a custom mediator transform.
    pub fn with_transform(transform: T) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }

    /// Builds and runs the pipeline inside a fresh task group.
    pub async fn run(&self, config: &PipelineConfig, run: &RunContext) -> Result<RunOutcome<T::Output>>
    where
        T: Transform<u64> + 'static,
        T::Output: Send + 'static,
    {
        let pool = WorkerPool::new(MEDIATOR_STAGE, config.workers)?;
        let group = TaskGroup::new();

        let events = run.events.clone();
        let run_id = run.run_id;
        group.scope().on_cancel(move |error| {
            events.try_emit(
                SCOPE_CANCELLED,
                Some(serde_json::json!({
                    "run_id": run_id.to_string(),
                    "error": error.to_string(),
                    "stage": error.stage(),
                })),
            );
        });

        let numbers = source(&group, config.item_count, config.channel_capacity);
        let outputs = mediator(
            &group,
            pool,
            config.fail_at,
            self.transform.clone(),
            numbers,
            config.channel_capacity,
        );
        Ok(sink(&group, outputs).await)
    }
}

#[async_trait]
impl<T> ExecutionStrategy for CancelOnFirstError<T>
where
    T: Transform<u64> + 'static,
    T::Output: Send + 'static,
{
    type Output = T::Output;

    fn name(&self) -> &'static str {
        "cancel_on_first_error"
    }

    async fn execute(&self, config: &PipelineConfig, run: &RunContext) -> RunOutcome<T::Output> {
        debug!(run_id = %run.run_id, "Running cancel-on-first-error pipeline");
        self.run(config, run).await.unwrap_or_else(RunOutcome::failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::transform::FnTransform;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_source_emits_from_one() {
        let group = TaskGroup::new();
        let mut rx = source(&group, 3, 1);

        let mut seen = Vec::new();
        while let Some(n) = rx.recv().await {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_source_stops_when_cancelled() {
        let group = TaskGroup::new();
        let mut rx = source(&group, 1_000, 1);

        assert_eq!(rx.recv().await, Some(1));
        group.cancel_all(PipelineError::synthetic("test"));

        // At most the value already in flight arrives after cancellation.
        let mut late = 0;
        while rx.recv().await.is_some() {
            late += 1;
        }
        assert!(late <= 2);
        assert_eq!(group.wait().await, Err(PipelineError::synthetic("test")));
    }

    #[tokio::test]
    async fn test_mediator_failure_cancels_run() {
        let group = TaskGroup::new();
        let numbers = source(&group, 100, 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 2).unwrap();
        let out = mediator(
            &group,
            pool,
            FailureTrigger::at(3),
            Arc::new(ToStringTransform),
            numbers,
            1,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(5), sink(&group, out))
            .await
            .expect("run finished");

        assert_eq!(outcome.error, Some(PipelineError::synthetic(MEDIATOR_STAGE)));
        assert!(outcome.results.len() < 100);
        assert!(!outcome.results.contains(&"100".to_string()));
    }

    #[tokio::test]
    async fn test_transform_error_cancels_run() {
        let group = TaskGroup::new();
        let numbers = source(&group, 50, 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 3).unwrap();
        let transform = FnTransform::new(|n: u64| {
            if n == 2 {
                Err(PipelineError::stage_failure(MEDIATOR_STAGE, "cannot format 2"))
            } else {
                Ok(n.to_string())
            }
        });
        let out = mediator(
            &group,
            pool,
            FailureTrigger::never(),
            Arc::new(transform),
            numbers,
            1,
        );

        let outcome = sink(&group, out).await;
        assert_eq!(
            outcome.error,
            Some(PipelineError::stage_failure(MEDIATOR_STAGE, "cannot format 2"))
        );
        assert!(!outcome.results.contains(&"2".to_string()));
    }

    #[tokio::test]
    async fn test_trigger_value_is_forwarded_before_failing() {
        let group = TaskGroup::new();
        let numbers = source(&group, 3, 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 1).unwrap();
        let out = mediator(
            &group,
            pool,
            FailureTrigger::at(2),
            Arc::new(ToStringTransform),
            numbers,
            1,
        );

        let outcome = sink(&group, out).await;
        assert_eq!(outcome.error, Some(PipelineError::synthetic(MEDIATOR_STAGE)));
        assert_eq!(outcome.results, vec!["1", "2", "3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_panic_cancels_run() {
        let group = TaskGroup::new();
        let numbers = source(&group, 10_000, 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 2).unwrap();
        let transform = FnTransform::new(|n: u64| -> Result<String> {
            assert!(n != 2, "transform panics on 2");
            Ok(n.to_string())
        });
        let out = mediator(
            &group,
            pool,
            FailureTrigger::never(),
            Arc::new(transform),
            numbers,
            1,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(5), sink(&group, out))
            .await
            .expect("run finished");

        match outcome.error {
            Some(PipelineError::WorkerPanicked { stage, detail }) => {
                assert_eq!(stage, MEDIATOR_STAGE);
                assert!(detail.contains("transform panics on 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(outcome.results.len() < 1_000);
    }

    #[tokio::test]
    async fn test_cancellation_event_emitted() {
        let events = Arc::new(CollectingEventSink::new());
        let run = RunContext::new(events.clone());
        let config = PipelineConfig::new().with_item_count(3).with_fail_at(1);

        let outcome = CancelOnFirstError::new().run(&config, &run).await.unwrap();
        assert!(outcome.error.is_some());

        let data = events.first(SCOPE_CANCELLED).expect("cancel event");
        assert_eq!(data["stage"], serde_json::json!(MEDIATOR_STAGE));
        assert_eq!(data["run_id"], serde_json::json!(run.run_id.to_string()));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let strategy = CancelOnFirstError::new();
        let config = PipelineConfig::new().with_workers(0);
        let outcome = strategy.execute(&config, &RunContext::default()).await;
        assert!(matches!(outcome.error, Some(PipelineError::InvalidConfig(_))));
    }
}
