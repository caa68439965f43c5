//! Ingest queue and planning stage.
//!
//! Producers push documents into a bounded queue. The planning stage gathers
//! windows of `batch_size` documents, plans them into batches and forwards the
//! batches to the executor through a second bounded channel. Both channels
//! suspend the sending side when full, so a slow store slows the producers
//! down instead of buffering documents without bound.
//!
//! Dropping every [`IngestSender`] completes the queue: the planning stage
//! plans what is left and closes the batch stream.
use std::{pin::pin, sync::Arc};

use futures::{Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    batch::Batch,
    document::Document,
    error::{CancelledSnafu, ImportError, QueueClosedSnafu, Result},
    executor::{PipelineExecutor, ProgressCallback, RunSummary},
    governor::ThroughputGovernor,
    options::ImportOptions,
    planner::BatchPlanner,
    store::{DocumentStore, resolve_capacity},
};

#[derive(Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<Document>,
    governor: Arc<ThroughputGovernor>,
}

pub struct IngestReceiver {
    rx: mpsc::Receiver<Document>,
}

/// Imports a stream of documents into a store.
pub struct Importer {
    store: Arc<dyn DocumentStore>,
    options: ImportOptions,
    progress: Option<ProgressCallback>,
}

/// Creates a bounded ingest queue holding at most `capacity` documents.
pub fn ingest_queue(
    capacity: usize,
    governor: Arc<ThroughputGovernor>,
) -> (IngestSender, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestSender { tx, governor }, IngestReceiver { rx })
}

impl IngestSender {
    /// Pushes a document into the queue, waiting while the queue is full.
    pub async fn send(&self, document: Document, ct: &CancellationToken) -> Result<()> {
        self.governor.memory_backpressure(ct).await?;

        let permit = tokio::select! {
            biased;
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            permit = self.tx.reserve() => permit.map_err(|_| QueueClosedSnafu {}.build())?,
        };

        self.governor.buffered().add(document.size_bytes());
        permit.send(document);

        Ok(())
    }
}

impl IngestReceiver {
    /// Returns the next document, or `None` once the queue completed.
    ///
    /// Cancelling the token closes the queue.
    pub async fn recv(&mut self, ct: &CancellationToken) -> Option<Document> {
        tokio::select! {
            biased;
            _ = ct.cancelled() => {
                self.rx.close();
                None
            }
            document = self.rx.recv() => document,
        }
    }
}

/// Spawns the planning stage.
///
/// Returns the stage's handle, resolving to the number of planned batches, and
/// the stream of planned batches.
pub fn spawn_plan_stage(
    mut receiver: IngestReceiver,
    planner: BatchPlanner,
    batch_size: usize,
    batch_capacity: usize,
    ct: CancellationToken,
) -> (JoinHandle<Result<usize>>, ReceiverStream<Batch>) {
    let (tx, rx) = mpsc::channel(batch_capacity.max(1));
    let batch_size = batch_size.max(1);

    let handle = tokio::spawn(async move {
        let mut window = Vec::with_capacity(batch_size);
        let mut planned = 0;

        while let Some(document) = receiver.recv(&ct).await {
            window.push(document);
            if window.len() >= batch_size {
                let documents = std::mem::replace(&mut window, Vec::with_capacity(batch_size));
                planned += forward(&planner, documents, &tx, &ct).await?;
            }
        }

        if ct.is_cancelled() {
            return CancelledSnafu {}.fail();
        }

        if !window.is_empty() {
            planned += forward(&planner, window, &tx, &ct).await?;
        }

        debug!(batches = planned, "Planning stage completed");
        Ok(planned)
    });

    (handle, ReceiverStream::new(rx))
}

async fn forward(
    planner: &BatchPlanner,
    documents: Vec<Document>,
    tx: &mpsc::Sender<Batch>,
    ct: &CancellationToken,
) -> Result<usize> {
    let batches = planner.plan(documents);
    let num_batches = batches.len();

    for batch in batches {
        tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            sent = tx.send(batch) => sent.map_err(|_| QueueClosedSnafu {}.build())?,
        }
    }

    Ok(num_batches)
}

impl Importer {
    pub fn new(store: Arc<dyn DocumentStore>, options: ImportOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            store,
            options,
            progress: None,
        })
    }

    /// Sets a callback invoked periodically with the run's progress.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Imports all documents of the stream.
    ///
    /// Fails only if the store's capacity cannot be read because of a fatal
    /// error, or if a stage of the pipeline stops abnormally. Batches that
    /// could not be written are reported in the summary.
    pub async fn run<S>(&self, documents: S, ct: &CancellationToken) -> Result<RunSummary>
    where
        S: Stream<Item = Document>,
    {
        let capacity = match self.options.ru_capacity {
            Some(capacity) => capacity,
            None => resolve_capacity(self.store.as_ref(), self.options.fallback_capacity).await?,
        };
        info!(capacity, "Starting import");

        let governor = Arc::new(ThroughputGovernor::new(
            self.options.governor_options(capacity),
        )?);
        let (sender, receiver) = ingest_queue(self.options.queue_capacity(), governor.clone());

        let planner = BatchPlanner::new(self.options.planner_options());
        let batch_capacity = self.options.max_concurrent_batches.saturating_mul(2);
        let (plan_stage, batches) = spawn_plan_stage(
            receiver,
            planner,
            self.options.batch_size,
            batch_capacity,
            ct.clone(),
        );

        let mut executor =
            PipelineExecutor::new(self.store.clone(), governor, self.options.executor_options());
        if let Some(progress) = &self.progress {
            executor = executor.with_progress(progress.clone());
        }

        let produce = async move {
            let mut documents = pin!(documents);
            let mut produced = 0u64;
            loop {
                let document = tokio::select! {
                    _ = ct.cancelled() => return CancelledSnafu {}.fail(),
                    document = documents.next() => document,
                };
                let Some(document) = document else {
                    break;
                };
                sender.send(document, ct).await?;
                produced += 1;
            }

            debug!(documents = produced, "Producer completed");
            Ok::<_, ImportError>(produced)
        };

        let (produced, summary) = tokio::join!(produce, executor.run(batches, ct));

        let planned = plan_stage.await.map_err(|err| ImportError::Stage {
            stage: "plan",
            message: err.to_string(),
        })?;

        match planned {
            Ok(batches) => debug!(batches, "Planned all documents"),
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                return Err(ImportError::Stage {
                    stage: "plan",
                    message: err.to_string(),
                });
            }
        }

        match produced {
            Ok(produced) => info!(documents = produced, "Import completed"),
            Err(err) if err.is_cancelled() => warn!("Import cancelled"),
            Err(err) => {
                return Err(ImportError::Stage {
                    stage: "produce",
                    message: err.to_string(),
                });
            }
        }

        Ok(summary)
    }
}
