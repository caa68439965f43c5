use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ObservabilitySnafu, Result},
    import::ImportArgs,
    plan::PlanArgs,
};

mod config;
mod error;
mod import;
mod plan;
mod source;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Throughput-governed document import")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import documents into an in-memory store
    Import {
        #[clap(flatten)]
        inner: ImportArgs,
    },
    /// Show how documents would be batched
    Plan {
        #[clap(flatten)]
        inner: PlanArgs,
    },
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    sluice_observability::init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Import { inner } => inner.run(ct).await,
        Commands::Plan { inner } => inner.run(ct).await,
    }
}
