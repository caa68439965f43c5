use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use sluice_import_core::{Importer, InMemoryDocumentStore, Progress, RunSummary, store::WriteMode};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::ConfigArgs,
    error::{ImportSnafu, InvalidArgumentSnafu, Result},
    source::{document_stream, list_files},
};

/// Import documents into an in-memory store
#[derive(Parser)]
pub struct ImportArgs {
    /// A `.json`/`.ndjson` file, or a directory containing them.
    input: PathBuf,

    /// Throughput capacity of the store, in RCU per second.
    #[arg(long, default_value_t = 50_000)]
    store_capacity: u64,

    /// Reject documents that already exist instead of replacing them.
    #[arg(long, default_value_t = false)]
    create_only: bool,

    #[clap(flatten)]
    config: ConfigArgs,
}

impl ImportArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        ensure!(
            self.store_capacity > 0,
            InvalidArgumentSnafu {
                name: "store-capacity",
                message: "must be greater than zero".to_string(),
            }
        );

        let options = self.config.load().await?;
        let files = list_files(&self.input).await?;
        info!(files = files.len(), input = %self.input.display(), "Starting import");

        let write_mode = if self.create_only {
            WriteMode::Create
        } else {
            WriteMode::Upsert
        };
        let store =
            Arc::new(InMemoryDocumentStore::new(self.store_capacity).with_write_mode(write_mode));

        let importer = Importer::new(store.clone(), options)
            .context(ImportSnafu {})?
            .with_progress(Arc::new(|progress: Progress| {
                info!(
                    completed = progress.completed,
                    total = progress.total,
                    "Import progress"
                );
            }));

        let summary = importer
            .run(document_stream(files), &ct)
            .await
            .context(ImportSnafu {})?;

        print_summary(&summary, store.len());

        Ok(())
    }
}

fn print_summary(summary: &RunSummary, stored: usize) {
    if summary.cancelled {
        println!("Import cancelled");
    }
    println!(
        "Wrote {} documents in {} batches ({:.2} RCU, {:.1?})",
        summary.documents_written, summary.batches_written, summary.total_cost, summary.elapsed
    );
    if summary.batches_failed > 0 {
        println!(
            "{} batches failed ({} documents)",
            summary.batches_failed, summary.documents_failed
        );
    }
    if summary.rejected_writes > 0 {
        println!("{} writes rate limited", summary.rejected_writes);
    }
    if summary.requeued_documents > 0 {
        println!("{} documents requeued", summary.requeued_documents);
    }
    if summary.documents_dropped > 0 {
        println!("{} documents dropped", summary.documents_dropped);
    }
    println!("Store holds {stored} documents");
}
