use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    batch::Batch,
    document::Document,
    governor::{exponential_backoff, sleep_or_cancel},
    store::StoreError,
};

use super::{BatchOutcome, PipelineExecutor, RunState, ShrinkPolicy};

/// Attempts after which only a prefix of the batch is sent.
const FULL_BATCH_ATTEMPTS: u32 = 3;

enum AttemptError {
    Cancelled,
    Store(StoreError),
}

impl PipelineExecutor {
    /// Writes one batch, retrying until it succeeds or exhausts its attempts.
    pub(super) async fn process_batch(
        &self,
        batch_id: u64,
        mut batch: Batch,
        run: &RunState,
        ct: &CancellationToken,
    ) -> BatchOutcome {
        let start = Instant::now();
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        while attempt < max_attempts {
            attempt += 1;

            if run.pacer.wait(ct).await.is_err() {
                return BatchOutcome::Cancelled;
            }

            let shrink = attempt > FULL_BATCH_ATTEMPTS
                && batch.len() > self.options.smaller_batch_size.max(1);
            let selected = if shrink {
                &batch.documents()[..self.options.smaller_batch_size.max(1)]
            } else {
                batch.documents()
            };

            let result = self.write_attempt(selected, run, ct).await;
            let error = match result {
                Ok(cost) => {
                    let written = selected.len();
                    self.record_written(batch_id, written, cost, start, run);
                    let remainder = if shrink { batch.split_off(written) } else { None };
                    self.release(batch.documents());
                    return self.handle_remainder(batch_id, remainder, run);
                }
                Err(AttemptError::Cancelled) => return BatchOutcome::Cancelled,
                Err(AttemptError::Store(error)) => error,
            };

            if attempt >= max_attempts {
                warn!(
                    batch_id,
                    attempt,
                    max_attempts,
                    error = %error,
                    "Batch write failed"
                );
                break;
            }

            let retried = match self.governor.on_rejection(&error, attempt, ct).await {
                Ok(retried) => retried,
                Err(_) => return BatchOutcome::Cancelled,
            };

            if !retried {
                let backoff = exponential_backoff(attempt);
                warn!(
                    batch_id,
                    attempt,
                    max_attempts,
                    error = %error,
                    ?backoff,
                    "Batch write failed. Retrying"
                );
                if sleep_or_cancel(backoff, ct).await.is_err() {
                    return BatchOutcome::Cancelled;
                }
            }
        }

        let elapsed = start.elapsed();
        warn!(
            batch_id,
            documents = batch.len(),
            attempts = max_attempts,
            ?elapsed,
            "Batch exhausted all attempts"
        );
        run.telemetry.record_failed(batch.len());
        self.metrics.batches_failed.add(1, &[]);
        self.metrics.batch_duration.record(elapsed.as_secs_f64(), &[]);
        self.release(batch.documents());

        BatchOutcome::Completed
    }

    /// Writes all documents concurrently, failing if any write failed.
    ///
    /// Rate limited writes take precedence over other errors, with the longest
    /// retry hint of the attempt.
    async fn write_attempt(
        &self,
        documents: &[Document],
        run: &RunState,
        ct: &CancellationToken,
    ) -> Result<f64, AttemptError> {
        let writes = documents
            .iter()
            .map(|document| self.write_document(document, run, ct));
        let results = join_all(writes).await;

        let mut total_cost = 0.0;
        let mut rate_limited: Option<Option<Duration>> = None;
        let mut other_error = None;

        for result in results {
            match result {
                Ok(cost) => total_cost += cost,
                Err(AttemptError::Cancelled) => return Err(AttemptError::Cancelled),
                Err(AttemptError::Store(StoreError::RateLimited { retry_after })) => {
                    let longest = rate_limited.flatten().max(retry_after);
                    rate_limited = Some(longest);
                }
                Err(AttemptError::Store(error)) => {
                    other_error.get_or_insert(error);
                }
            }
        }

        if let Some(retry_after) = rate_limited {
            return Err(AttemptError::Store(StoreError::RateLimited { retry_after }));
        }

        match other_error {
            Some(error) => Err(AttemptError::Store(error)),
            None => Ok(total_cost),
        }
    }

    async fn write_document(
        &self,
        document: &Document,
        run: &RunState,
        ct: &CancellationToken,
    ) -> Result<f64, AttemptError> {
        let estimate = run.estimator.estimate();
        self.governor
            .admit(estimate, document.partition_key(), ct)
            .await
            .map_err(|_| AttemptError::Cancelled)?;

        let result = tokio::select! {
            _ = ct.cancelled() => return Err(AttemptError::Cancelled),
            result = self.store.write(document, document.partition_key()) => result,
        };

        match result {
            Ok(cost) => {
                run.estimator.observe(cost);
                Ok(cost)
            }
            Err(StoreError::Conflict { id }) => {
                debug!(id, "Document already exists");
                Ok(0.0)
            }
            Err(error) => {
                if error.is_rate_limited() {
                    run.telemetry.record_rejected();
                    self.metrics.rejections.add(1, &[]);
                }
                Err(AttemptError::Store(error))
            }
        }
    }

    fn record_written(
        &self,
        batch_id: u64,
        documents: usize,
        cost: f64,
        start: Instant,
        run: &RunState,
    ) {
        let elapsed = start.elapsed();
        debug!(batch_id, documents, cost, ?elapsed, "Batch written");

        run.telemetry.record_written(documents, cost);
        self.metrics.documents_written.add(documents as u64, &[]);
        self.metrics.request_cost.add(cost, &[]);
        self.metrics.batch_duration.record(elapsed.as_secs_f64(), &[]);
    }

    fn handle_remainder(
        &self,
        batch_id: u64,
        remainder: Option<Batch>,
        run: &RunState,
    ) -> BatchOutcome {
        let Some(remainder) = remainder else {
            return BatchOutcome::Completed;
        };

        match self.options.shrink_policy {
            ShrinkPolicy::Requeue => {
                debug!(batch_id, documents = remainder.len(), "Requeueing rest of shrunk batch");
                run.telemetry.record_requeued(remainder.len());
                BatchOutcome::Requeue(remainder)
            }
            ShrinkPolicy::Drop => {
                warn!(batch_id, documents = remainder.len(), "Dropping rest of shrunk batch");
                run.telemetry.record_dropped(remainder.len());
                self.release(remainder.documents());
                BatchOutcome::Completed
            }
        }
    }

    /// Releases the documents from the buffered bytes gauge.
    fn release(&self, documents: &[Document]) {
        let bytes = documents.iter().map(Document::size_bytes).sum();
        self.governor.buffered().release(bytes);
    }
}
