//! Document store client contract.
//!
//! The store charges a cost in request cost units (RCU) for every write and
//! rejects requests that would exceed its provisioned throughput.
use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;
use tracing::{info, warn};

use crate::{
    document::Document,
    error::{ImportError, Result},
};

pub mod memory;

pub use memory::{CostModel, InMemoryDocumentStore, WriteMode};

/// Provisioned throughput used when the store does not report one.
pub const DEFAULT_FALLBACK_CAPACITY: u64 = 50_000;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The request was rejected by admission control.
    #[snafu(display("request rate is too large"))]
    RateLimited { retry_after: Option<Duration> },
    /// A document with the same id already exists.
    #[snafu(display("document {id} already exists"))]
    Conflict { id: String },
    /// The request failed but may succeed if retried.
    #[snafu(display("transient store error: {message}"))]
    Transient { message: String },
    /// The request failed and will not succeed if retried.
    #[snafu(display("fatal store error: {message}"))]
    Fatal { message: String },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes the document to the given partition, returning the request cost.
    async fn write(&self, document: &Document, partition_key: &str) -> Result<f64, StoreError>;

    /// Returns the provisioned throughput in RCU per second.
    async fn read_provisioned_capacity(&self) -> Result<u64, StoreError>;
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StoreError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Reads the store's provisioned capacity once at startup.
///
/// Unreadable capacities fall back to `fallback`. A fatal store error aborts the
/// import since no batch could be written anyway.
pub async fn resolve_capacity(store: &dyn DocumentStore, fallback: u64) -> Result<u64> {
    match store.read_provisioned_capacity().await {
        Ok(0) => {
            warn!(fallback, "Store reported no provisioned capacity. Using fallback");
            Ok(fallback)
        }
        Ok(capacity) => {
            info!(capacity, "Read provisioned capacity");
            Ok(capacity)
        }
        Err(source @ StoreError::Fatal { .. }) => Err(ImportError::Store {
            operation: "read_provisioned_capacity",
            source,
        }),
        Err(err) => {
            warn!(error = %err, fallback, "Failed to read provisioned capacity. Using fallback");
            Ok(fallback)
        }
    }
}
