//! Batch planning.
//!
//! Planning runs in two passes over an ordered sequence of documents:
//!
//! 1. **Packing**: documents are packed in input order into batches bounded by
//!    [`PlannerOptions::max_batch_count`] and [`PlannerOptions::max_batch_bytes`].
//!    A single document larger than the byte limit is never split and becomes
//!    a batch of its own.
//! 2. **Affinity**: the documents of each packed batch are grouped by partition
//!    key and flattened back into batches, so that writes to the same
//!    partition are adjacent. See [`affinity`].
//!
//! Planning is deterministic and never drops or duplicates documents.
use bytesize::ByteSize;
use tracing::debug;

use crate::{batch::Batch, document::Document};

mod affinity;

/// Maximum number of documents in a batch.
pub const DEFAULT_MAX_BATCH_COUNT: usize = 100;
/// Maximum number of bytes in a batch, matching the store's request limit.
pub const DEFAULT_MAX_BATCH_BYTES: u64 = 2_000_000;
/// Trailing groups smaller than this are merged into the previous batch.
pub const DEFAULT_MIN_BATCH_SIZE_FOR_MERGE: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOptions {
    /// Maximum number of documents in a batch.
    pub max_batch_count: usize,
    /// Maximum number of bytes in a packed batch.
    pub max_batch_bytes: u64,
    /// Trailing partition groups with fewer documents are merged into the
    /// preceding batch when possible.
    pub min_batch_size_for_merge: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    options: PlannerOptions,
}

/// Aggregate size of a set of batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAnalysis {
    pub batch_count: usize,
    pub total_bytes: u64,
}

impl BatchPlanner {
    pub fn new(options: PlannerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Plans the documents into batches.
    pub fn plan(&self, documents: Vec<Document>) -> Vec<Batch> {
        let num_documents = documents.len();
        let packed = self.pack(documents);
        let num_packed = packed.len();

        let mut planned = Vec::with_capacity(num_packed);
        for batch in packed {
            affinity::rebalance(batch, &self.options, &mut planned);
        }

        debug!(
            documents = num_documents,
            packed = num_packed,
            planned = planned.len(),
            "Planned batches"
        );

        planned.into_iter().map(Batch::from_planned).collect()
    }

    /// Recomputes the number of batches and their total size.
    pub fn analyze(&self, batches: &[Batch]) -> BatchAnalysis {
        let total_bytes = batches.iter().map(Batch::total_bytes).sum();
        debug!(
            batches = batches.len(),
            total_size = %ByteSize(total_bytes),
            "Analyzed batches"
        );

        BatchAnalysis {
            batch_count: batches.len(),
            total_bytes,
        }
    }

    /// First pass: pack documents by count and size, preserving input order.
    fn pack(&self, documents: Vec<Document>) -> Vec<Vec<Document>> {
        let mut packed = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0u64;

        for document in documents {
            let size = document.size_bytes();

            let is_full = current.len() >= self.options.max_batch_count;
            let would_overflow = current_bytes.saturating_add(size) > self.options.max_batch_bytes;
            if (is_full || would_overflow) && !current.is_empty() {
                packed.push(std::mem::take(&mut current));
                current_bytes = 0;
            }

            current.push(document);
            current_bytes = current_bytes.saturating_add(size);
        }

        if !current.is_empty() {
            packed.push(current);
        }

        packed
    }
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            min_batch_size_for_merge: DEFAULT_MIN_BATCH_SIZE_FOR_MERGE,
        }
    }
}
