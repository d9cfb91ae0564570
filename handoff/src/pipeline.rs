//! Pipeline assembly and entry points.
//!
//! [`Pipeline`] validates a [`PipelineConfig`], reports lifecycle events and
//! hands the run to an [`ExecutionStrategy`]. The two free functions are the
//! plain entry points, one per error policy.

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink, PIPELINE_COMPLETED, PIPELINE_FAILED, PIPELINE_STARTED};
use crate::policy::{CancelOnFirstError, DrainAndCarry, ExecutionStrategy, RunContext, RunOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// A configured source -> mediator -> sink pipeline.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    events: Arc<dyn EventSink>,
}

impl Pipeline {
    /// Creates a pipeline that reports no events.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline once with `strategy`.
    ///
    /// Every run gets fresh channels, workers and a fresh run id. An invalid
    /// configuration yields an outcome with no results and the validation
    /// error.
    pub async fn run<S>(&self, strategy: &S) -> RunOutcome<S::Output>
    where
        S: ExecutionStrategy + ?Sized,
    {
        let run = RunContext::new(self.events.clone());
        let span = info_span!("pipeline_run", run_id = %run.run_id, policy = strategy.name());

        async {
            if let Err(error) = self.config.validate() {
                warn!(error = %error, "Rejecting pipeline configuration");
                self.emit_finished(&run, strategy.name(), 0, Some(&error), 0);
                return RunOutcome::failed(error);
            }

            self.events
                .emit(
                    PIPELINE_STARTED,
                    Some(serde_json::json!({
                        "run_id": run.run_id.to_string(),
                        "policy": strategy.name(),
                        "item_count": self.config.item_count,
                        "workers": self.config.workers,
                        "fail_at": self.config.fail_at.value(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    })),
                )
                .await;
            info!(
                item_count = self.config.item_count,
                workers = self.config.workers,
                "Pipeline started"
            );

            let started = Instant::now();
            let outcome = strategy.execute(&self.config, &run).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &outcome.error {
                None => info!(results = outcome.results.len(), elapsed_ms, "Pipeline completed"),
                Some(error) => warn!(
                    results = outcome.results.len(),
                    elapsed_ms,
                    error = %error,
                    "Pipeline failed"
                ),
            }
            self.emit_finished(
                &run,
                strategy.name(),
                outcome.results.len(),
                outcome.error.as_ref(),
                elapsed_ms,
            );
            outcome
        }
        .instrument(span)
        .await
    }

    fn emit_finished(
        &self,
        run: &RunContext,
        policy: &str,
        results: usize,
        error: Option<&PipelineError>,
        elapsed_ms: u64,
    ) {
        let event_type = if error.is_some() {
            PIPELINE_FAILED
        } else {
            PIPELINE_COMPLETED
        };
        self.events.try_emit(
            event_type,
            Some(serde_json::json!({
                "run_id": run.run_id.to_string(),
                "policy": policy,
                "results": results,
                "error": error.map(ToString::to_string),
                "elapsed_ms": elapsed_ms,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        );
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs a drain-and-carry pipeline over `0..item_count`.
///
/// The source fails right after emitting `error_after`; pass a value outside
/// `0..item_count` (such as `-1`) for a clean run.
pub async fn run_drain_and_carry(item_count: u64, error_after: i64, workers: usize) -> RunOutcome<String> {
    let config = PipelineConfig::new()
        .with_item_count(item_count)
        .with_fail_at(error_after)
        .with_workers(workers);
    Pipeline::new(config).run(&DrainAndCarry::new()).await
}

/// Runs a cancel-on-first-error pipeline over `1..=item_count`.
///
/// A mediator worker fails right after forwarding a value greater than
/// `threshold`; pass `i64::MAX` for a clean run.
pub async fn run_cancel_on_first_error(
    item_count: u64,
    threshold: i64,
    workers: usize,
) -> RunOutcome<String> {
    let config = PipelineConfig::new()
        .with_item_count(item_count)
        .with_fail_at(threshold)
        .with_workers(workers);
    Pipeline::new(config).run(&CancelOnFirstError::new()).await
}
