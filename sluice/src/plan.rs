use std::path::PathBuf;

use bytesize::ByteSize;
use clap::Parser;
use sluice_import_core::BatchPlanner;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ConfigArgs,
    error::Result,
    source::{list_files, read_documents},
};

/// Show the batches planned for the input, without writing them
#[derive(Parser)]
pub struct PlanArgs {
    /// A `.json`/`.ndjson` file, or a directory containing them.
    input: PathBuf,

    /// List every batch.
    #[arg(long, default_value_t = false)]
    verbose: bool,

    #[clap(flatten)]
    config: ConfigArgs,
}

impl PlanArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let options = self.config.load().await?;
        let planner = BatchPlanner::new(options.planner_options());

        let mut documents = Vec::new();
        for file in list_files(&self.input).await? {
            if ct.is_cancelled() {
                return Ok(());
            }
            documents.extend(read_documents(&file).await?);
        }

        let document_count = documents.len();
        let batches = planner.plan(documents);
        let analysis = planner.analyze(&batches);

        if self.verbose {
            for (index, batch) in batches.iter().enumerate() {
                println!(
                    "{index:>5}  {:>5} documents  {}",
                    batch.len(),
                    ByteSize::b(batch.total_bytes())
                );
            }
        }

        println!(
            "{} documents in {} batches ({})",
            document_count,
            analysis.batch_count,
            ByteSize::b(analysis.total_bytes)
        );

        Ok(())
    }
}
