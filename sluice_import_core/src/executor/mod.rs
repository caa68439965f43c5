//! Pipeline executor.
//!
//! The executor pulls batches from a stream and writes them to the store with
//! at most `max_concurrent_batches` batches in flight. Every document write is
//! admitted by the [`ThroughputGovernor`] first. Failed attempts are retried
//! up to `max_attempts` times; from the fourth attempt on only the first
//! `smaller_batch_size` documents are sent, and the [`ShrinkPolicy`] decides
//! what happens to the others once that attempt succeeds.
//!
//! A batch that exhausts its attempts is logged and counted, the run goes on
//! with the next batches.
use std::{collections::VecDeque, pin::pin, sync::Arc, time::Duration};

use futures::{Stream, StreamExt, stream::FuturesUnordered};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{batch::Batch, governor::ThroughputGovernor, metrics::ImportMetrics, store::DocumentStore};

mod attempt;
mod pacer;
mod telemetry;

use self::pacer::{CostEstimator, DispatchPacer};
pub use self::telemetry::{Progress, ProgressCallback, RunSummary};
use self::telemetry::RunTelemetry;

pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 9;
pub const DEFAULT_SMALLER_BATCH_SIZE: usize = 25;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10;
pub const DEFAULT_INITIAL_COST_ESTIMATE: f64 = 10.0;

/// What happens to the documents left out of a shrunk attempt once it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShrinkPolicy {
    /// The documents are sent again as a new batch, with a fresh attempt budget.
    #[default]
    Requeue,
    /// The documents are discarded and counted as dropped.
    Drop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    pub max_concurrent_batches: usize,
    /// Minimum interval between two attempt dispatches.
    pub min_time_between_batches: Duration,
    pub max_attempts: u32,
    /// Number of documents sent by attempts after the third.
    pub smaller_batch_size: usize,
    pub shrink_policy: ShrinkPolicy,
    /// Number of completed batches between two progress reports.
    pub progress_interval: usize,
    /// Cost per document used for admission before the store reported any cost.
    pub initial_cost_estimate: f64,
}

pub struct PipelineExecutor {
    store: Arc<dyn DocumentStore>,
    governor: Arc<ThroughputGovernor>,
    options: ExecutorOptions,
    progress: Option<ProgressCallback>,
    metrics: ImportMetrics,
}

/// State shared by the batch workers of one run.
struct RunState {
    telemetry: RunTelemetry,
    pacer: DispatchPacer,
    estimator: CostEstimator,
}

/// How a batch left the worker.
enum BatchOutcome {
    /// The batch was written or exhausted its attempts.
    Completed,
    /// Part of the batch was written, the rest must be sent again.
    Requeue(Batch),
    Cancelled,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        governor: Arc<ThroughputGovernor>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            store,
            governor,
            options,
            progress: None,
            metrics: ImportMetrics::default(),
        }
    }

    /// Sets a callback invoked periodically with the run's progress.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Writes all batches of the stream, returning the run totals.
    ///
    /// The run ends when the stream is exhausted and all batches completed, or
    /// when the token is cancelled. Batches in flight at cancellation are
    /// abandoned; writes already issued are not rolled back.
    pub async fn run<S>(&self, batches: S, ct: &CancellationToken) -> RunSummary
    where
        S: Stream<Item = Batch>,
    {
        let start = Instant::now();
        let run = RunState {
            telemetry: RunTelemetry::default(),
            pacer: DispatchPacer::new(self.options.min_time_between_batches),
            estimator: CostEstimator::new(self.options.initial_cost_estimate),
        };

        let max_in_flight = self.options.max_concurrent_batches.max(1);
        let mut batches = pin!(batches);
        let (expected_batches, _) = batches.size_hint();

        let mut in_flight = FuturesUnordered::new();
        let mut requeued = VecDeque::new();
        let mut next_batch_id = 0u64;
        let mut pulled = 0usize;
        let mut num_requeued = 0usize;
        let mut completed = 0usize;
        let mut input_done = false;
        let mut cancelled = false;

        loop {
            while in_flight.len() < max_in_flight {
                let Some(batch) = requeued.pop_front() else {
                    break;
                };
                in_flight.push(self.process_batch(next_batch_id, batch, &run, ct));
                next_batch_id += 1;
            }

            let can_pull = !input_done && requeued.is_empty() && in_flight.len() < max_in_flight;
            if !can_pull && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = ct.cancelled() => {
                    cancelled = true;
                    break;
                }
                batch = batches.next(), if can_pull => {
                    match batch {
                        Some(batch) => {
                            pulled += 1;
                            in_flight.push(self.process_batch(next_batch_id, batch, &run, ct));
                            next_batch_id += 1;
                        }
                        None => {
                            debug!(batches = pulled, "Batch stream completed");
                            input_done = true;
                        }
                    }
                }
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    match outcome {
                        BatchOutcome::Completed => {}
                        BatchOutcome::Requeue(batch) => {
                            num_requeued += 1;
                            requeued.push_back(batch);
                        }
                        BatchOutcome::Cancelled => {
                            cancelled = true;
                            break;
                        }
                    }

                    completed += 1;
                    if self.options.progress_interval > 0
                        && completed % self.options.progress_interval == 0
                    {
                        let total = expected_batches.max(pulled) + num_requeued;
                        self.report_progress(Progress { completed, total });
                    }
                }
            }
        }

        // Abandon the batches in flight before reporting.
        drop(in_flight);
        let cancelled = cancelled || ct.is_cancelled();

        let total = expected_batches.max(pulled) + num_requeued;
        self.report_progress(Progress { completed, total });

        let summary = run.telemetry.summary(start.elapsed(), cancelled);
        info!(
            documents = summary.documents_written,
            cost = summary.total_cost,
            batches = summary.batches_written,
            failed_batches = summary.batches_failed,
            elapsed = ?summary.elapsed,
            cancelled,
            "Pipeline run completed"
        );

        summary
    }

    fn report_progress(&self, progress: Progress) {
        info!(
            completed = progress.completed,
            total = progress.total,
            "Processed batches"
        );

        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            min_time_between_batches: Duration::ZERO,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            smaller_batch_size: DEFAULT_SMALLER_BATCH_SIZE,
            shrink_policy: ShrinkPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            initial_cost_estimate: DEFAULT_INITIAL_COST_ESTIMATE,
        }
    }
}
