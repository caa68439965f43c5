use snafu::Snafu;

use crate::store::StoreError;

/// Import error types.
///
/// Per-document and per-batch write failures never show up here: they are
/// handled by the executor's attempt loop. Only startup failures, queue
/// shutdown and cancellation reach the caller.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ImportError {
    /// The import cannot start with the provided configuration.
    #[snafu(display("fatal configuration error: {message}"))]
    FatalConfiguration { message: String },
    /// A store operation required at startup failed.
    #[snafu(display("failed store operation {operation}"))]
    Store {
        operation: &'static str,
        source: StoreError,
    },
    /// A batch must contain at least one document.
    #[snafu(display("batch must contain at least one document"))]
    EmptyBatch,
    /// The receiving side of the ingest queue is gone.
    #[snafu(display("ingest queue closed"))]
    QueueClosed,
    /// The operation was cancelled.
    #[snafu(display("operation cancelled"))]
    Cancelled,
    /// A background stage of the import terminated abnormally.
    #[snafu(display("{stage} stage failed: {message}"))]
    Stage {
        stage: &'static str,
        message: String,
    },
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}
