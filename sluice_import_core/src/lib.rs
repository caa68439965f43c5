pub mod batch;
pub mod document;
pub mod error;
pub mod executor;
pub mod governor;
pub mod metrics;
pub mod options;
pub mod planner;
pub mod queue;
pub mod store;

#[cfg(test)]
pub mod test_utils;

pub use batch::Batch;
pub use document::Document;
pub use error::{ImportError, Result};
pub use executor::{
    ExecutorOptions, PipelineExecutor, Progress, ProgressCallback, RunSummary, ShrinkPolicy,
};
pub use governor::{GovernorOptions, ThroughputGovernor};
pub use options::ImportOptions;
pub use planner::{BatchAnalysis, BatchPlanner, PlannerOptions};
pub use queue::{Importer, IngestReceiver, IngestSender, ingest_queue, spawn_plan_stage};
pub use store::{DocumentStore, InMemoryDocumentStore, StoreError, resolve_capacity};
