//! Drain-and-carry execution.
//!
//! Errors are data: they travel downstream as [`PipelineItem::Failure`] and
//! never interrupt a receive loop. Every stage stops only when its input
//! closes, so no producer is ever left blocked on a send.

use super::{ExecutionStrategy, RunContext, RunOutcome, MEDIATOR_STAGE, SINK_STAGE, SOURCE_STAGE};
use crate::channel::{stage_channel, StageReceiver};
use crate::config::PipelineConfig;
use crate::core::PipelineItem;
use crate::errors::{PipelineError, Result};
use crate::pool::WorkerPool;
use crate::transform::{FailureTrigger, ToStringTransform, Transform};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tasks spawned for one drain-and-carry run.
///
/// There is no cancellation here; the tracker only lets the assembly join
/// every stage task before returning.
#[derive(Debug, Default)]
pub struct DrainTasks {
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl DrainTasks {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a stage task.
    pub fn spawn<Fut>(&self, name: &str, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handles
            .lock()
            .push((name.to_string(), tokio::spawn(task)));
    }

    /// Waits for every spawned task.
    ///
    /// Stage tasks forward their own failures in-band, so a join error here
    /// can only be logged.
    pub async fn join_all(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            if let Err(join_error) = handle.await {
                warn!(stage = %name, error = %join_error, "Stage task did not finish cleanly");
            }
        }
    }
}

/// Emits `0..item_count`, then stops early with one failure item right after
/// the value matching `trigger`.
pub fn source(
    tasks: &DrainTasks,
    item_count: u64,
    trigger: FailureTrigger,
    capacity: usize,
) -> StageReceiver<PipelineItem<u64>> {
    let (tx, rx) = stage_channel(SOURCE_STAGE, capacity);

    tasks.spawn(SOURCE_STAGE, async move {
        for n in 0..item_count {
            if tx.send(PipelineItem::Value(n)).await.is_err() {
                warn!(stage = SOURCE_STAGE, "Downstream closed, source stopping");
                break;
            }

            if trigger.matches(n) {
                debug!(stage = SOURCE_STAGE, value = n, "Emitting injected failure");
                if tx
                    .send(PipelineItem::Failure(PipelineError::synthetic(SOURCE_STAGE)))
                    .await
                    .is_err()
                {
                    warn!(stage = SOURCE_STAGE, "Downstream closed before failure was delivered");
                }
                break;
            }
        }
        tx.close();
        debug!(stage = SOURCE_STAGE, "Source finished");
    });

    rx
}

/// Runs `pool` over `input`, transforming values and forwarding failures.
///
/// Workers keep reading after a failure and after a failed send. If the pool
/// itself fails (a worker panicked), one failure item is sent before the
/// output closes.
pub fn mediator<I, T>(
    tasks: &DrainTasks,
    pool: WorkerPool,
    transform: Arc<T>,
    input: StageReceiver<PipelineItem<I>>,
    capacity: usize,
) -> StageReceiver<PipelineItem<T::Output>>
where
    I: Send + 'static,
    T: Transform<I> + ?Sized + 'static,
    T::Output: Send + 'static,
{
    let stage = pool.stage().to_string();
    let (tx, rx) = stage_channel(stage.clone(), capacity);
    let input = input.into_shared();

    tasks.spawn(&stage, async move {
        let result = pool
            .run(|worker| {
                let input = input.clone();
                let output = tx.clone();
                let transform = transform.clone();
                let stage = pool.stage().to_string();

                async move {
                    let mut downstream_open = true;
                    while let Some(item) = input.recv().await {
                        let forwarded: PipelineItem<T::Output> = match item {
                            PipelineItem::Failure(error) => {
                                debug!(stage = %stage, worker, error = %error, "Forwarding failure");
                                PipelineItem::Failure(error)
                            }
                            PipelineItem::Value(value) => transform.apply(value).into(),
                        };

                        if downstream_open && output.send(forwarded).await.is_err() {
                            warn!(stage = %stage, worker, "Downstream closed, draining input");
                            downstream_open = false;
                        }
                    }
                    Ok(())
                }
            })
            .await;
        drop(input);

        if let Err(error) = result {
            if tx.send(PipelineItem::Failure(error)).await.is_err() {
                warn!(stage = %pool.stage(), "Downstream closed before pool failure was delivered");
            }
        }
        tx.close();
        debug!(stage = %pool.stage(), "Mediator finished");
    });

    rx
}

/// Collects values until the input closes. The first failure is kept; later
/// ones are logged and dropped.
pub async fn sink<T>(mut input: StageReceiver<PipelineItem<T>>) -> RunOutcome<T> {
    let mut results = Vec::new();
    let mut error = None;

    while let Some(item) = input.recv().await {
        match item {
            PipelineItem::Value(value) => results.push(value),
            PipelineItem::Failure(failure) => {
                if error.is_none() {
                    debug!(stage = SINK_STAGE, error = %failure, "Recording failure");
                    error = Some(failure);
                } else {
                    debug!(stage = SINK_STAGE, error = %failure, "Ignoring additional failure");
                }
            }
        }
    }

    RunOutcome { results, error }
}

/// The drain-and-carry strategy.
///
/// `config.fail_at` makes the source fail right after emitting that value.
#[derive(Debug)]
pub struct DrainAndCarry<T = ToStringTransform> {
    transform: Arc<T>,
}

impl DrainAndCarry {
    /// Creates the strategy with the default to-string transform.
    #[must_use]
    pub fn new() -> Self {
        Self::with_transform(ToStringTransform)
    }
}

impl Default for DrainAndCarry {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DrainAndCarry<T> {
    /// Creates the strategy with a custom mediator transform.
    pub fn with_transform(transform: T) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }

    /// Builds and runs the pipeline.
    pub async fn run(&self, config: &PipelineConfig) -> Result<RunOutcome<T::Output>>
    where
        T: Transform<u64> + 'static,
        T::Output: Send + 'static,
    {
        let pool = WorkerPool::new(MEDIATOR_STAGE, config.workers)?;
        let tasks = DrainTasks::new();

        let numbers = source(&tasks, config.item_count, config.fail_at, config.channel_capacity);
        let outputs = mediator(
            &tasks,
            pool,
            self.transform.clone(),
            numbers,
            config.channel_capacity,
        );
        let outcome = sink(outputs).await;

        // The sink saw the close, so every task is at most finishing up.
        tasks.join_all().await;
        Ok(outcome)
    }
}

#[async_trait]
impl<T> ExecutionStrategy for DrainAndCarry<T>
where
    T: Transform<u64> + 'static,
    T::Output: Send + 'static,
{
    type Output = T::Output;

    fn name(&self) -> &'static str {
        "drain_and_carry"
    }

    async fn execute(&self, config: &PipelineConfig, run: &RunContext) -> RunOutcome<T::Output> {
        debug!(run_id = %run.run_id, "Running drain-and-carry pipeline");
        self.run(config).await.unwrap_or_else(RunOutcome::failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FnTransform;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn collect_items<T>(mut rx: StageReceiver<PipelineItem<T>>) -> Vec<PipelineItem<T>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_source_emits_all_without_trigger() {
        let tasks = DrainTasks::new();
        let rx = source(&tasks, 3, FailureTrigger::never(), 1);

        let items = collect_items(rx).await;
        tasks.join_all().await;
        assert_eq!(
            items,
            vec![PipelineItem::Value(0), PipelineItem::Value(1), PipelineItem::Value(2)]
        );
    }

    #[tokio::test]
    async fn test_source_stops_after_failure() {
        let tasks = DrainTasks::new();
        let rx = source(&tasks, 5, FailureTrigger::at(1), 1);

        let items = collect_items(rx).await;
        tasks.join_all().await;
        assert_eq!(
            items,
            vec![
                PipelineItem::Value(0),
                PipelineItem::Value(1),
                PipelineItem::Failure(PipelineError::synthetic(SOURCE_STAGE)),
            ]
        );
    }

    #[tokio::test]
    async fn test_source_out_of_range_trigger() {
        let tasks = DrainTasks::new();
        let rx = source(&tasks, 2, FailureTrigger::at(2), 1);

        let items = collect_items(rx).await;
        assert!(items.iter().all(|item| !item.is_failure()));
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_mediator_keeps_consuming_after_failure() {
        let tasks = DrainTasks::new();
        let (tx, rx) = stage_channel(SOURCE_STAGE, 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 2).unwrap();
        let out = mediator(&tasks, pool, Arc::new(ToStringTransform), rx, 1);

        let producer = tokio::spawn(async move {
            tx.send(PipelineItem::Value(1_u64)).await.unwrap();
            tx.send(PipelineItem::Failure(PipelineError::synthetic(SOURCE_STAGE)))
                .await
                .unwrap();
            tx.send(PipelineItem::Value(2)).await.unwrap();
            tx.send(PipelineItem::Value(3)).await.unwrap();
        });

        let outcome = sink(out).await;
        producer.await.unwrap();
        tasks.join_all().await;

        let mut results = outcome.results;
        results.sort();
        assert_eq!(results, vec!["1", "2", "3"]);
        assert_eq!(outcome.error, Some(PipelineError::synthetic(SOURCE_STAGE)));
    }

    #[tokio::test]
    async fn test_transform_errors_are_carried() {
        let tasks = DrainTasks::new();
        let numbers = source(&tasks, 4, FailureTrigger::never(), 1);
        let transform = FnTransform::new(|n: u64| {
            if n == 2 {
                Err(PipelineError::stage_failure(MEDIATOR_STAGE, "cannot format 2"))
            } else {
                Ok(n.to_string())
            }
        });
        let pool = WorkerPool::new(MEDIATOR_STAGE, 2).unwrap();
        let out = mediator(&tasks, pool, Arc::new(transform), numbers, 1);

        let outcome = sink(out).await;
        tasks.join_all().await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(
            outcome.error,
            Some(PipelineError::stage_failure(MEDIATOR_STAGE, "cannot format 2"))
        );
    }

    #[tokio::test]
    async fn test_no_stage_task_outlives_the_sink() {
        let tasks = DrainTasks::new();
        let numbers = source(&tasks, 50, FailureTrigger::at(10), 1);
        let pool = WorkerPool::new(MEDIATOR_STAGE, 4).unwrap();
        let out = mediator(&tasks, pool, Arc::new(ToStringTransform), numbers, 1);

        let outcome = sink(out).await;
        assert_eq!(outcome.results.len(), 11);

        tokio::time::timeout(Duration::from_secs(1), tasks.join_all())
            .await
            .expect("stage task still blocked after the sink finished");
    }

    #[tokio::test]
    async fn test_sink_keeps_first_failure() {
        let (tx, rx) = stage_channel(MEDIATOR_STAGE, 4);
        tx.send(PipelineItem::Failure(PipelineError::synthetic("first")))
            .await
            .unwrap();
        tx.send(PipelineItem::Value("a".to_string())).await.unwrap();
        tx.send(PipelineItem::Failure(PipelineError::synthetic("second")))
            .await
            .unwrap();
        tx.close();

        let outcome = sink(rx).await;
        assert_eq!(outcome.results, vec!["a".to_string()]);
        assert_eq!(outcome.error, Some(PipelineError::synthetic("first")));
    }

    #[tokio::test]
    async fn test_pool_panic_is_forwarded() {
        let tasks = DrainTasks::new();
        let numbers = source(&tasks, 3, FailureTrigger::never(), 1);
        let transform = FnTransform::new(|n: u64| -> Result<String> {
            assert!(n != 1, "transform panics on 1");
            Ok(n.to_string())
        });
        let pool = WorkerPool::new(MEDIATOR_STAGE, 1).unwrap();
        let out = mediator(&tasks, pool, Arc::new(transform), numbers, 1);

        let outcome = tokio::time::timeout(Duration::from_secs(5), sink(out))
            .await
            .expect("sink finished");
        tasks.join_all().await;

        assert_eq!(outcome.results, vec!["0".to_string()]);
        assert!(matches!(outcome.error, Some(PipelineError::WorkerPanicked { .. })));
    }

    #[tokio::test]
    async fn test_strategy_runs_with_zero_workers_rejected() {
        let strategy = DrainAndCarry::new();
        let config = PipelineConfig::new().with_workers(0);
        let outcome: RunOutcome<String> = strategy.execute(&config, &RunContext::default()).await;
        assert!(matches!(outcome.error, Some(PipelineError::InvalidConfig(_))));
    }
}
