//! Partition affinity pass.
//!
//! Each packed batch is regrouped by partition key, in the order in which keys
//! first appear in the batch, and flattened into batches of at most
//! `max_batch_count` documents. Only the count limit applies here: the input
//! batch is already bounded in bytes and this pass only reorders its documents.
//!
//! A trailing batch smaller than `min_batch_size_for_merge` is appended to the
//! previously planned batch when the result still fits `max_batch_count`.
//! Documents are never moved forward into a later packed batch.
use std::collections::HashMap;

use crate::document::Document;

use super::PlannerOptions;

/// Documents of one batch sharing a partition key, in batch order.
struct PartitionGroup {
    documents: Vec<Document>,
}

/// Rebalances `batch`, appending the resulting batches to `planned`.
///
/// Merging a small trailing batch only checks the count limit, so the merged
/// batch may exceed `max_batch_bytes`. The previous batch may also come from an
/// earlier packed batch.
pub(super) fn rebalance(
    batch: Vec<Document>,
    options: &PlannerOptions,
    planned: &mut Vec<Vec<Document>>,
) {
    let max_count = options.max_batch_count.max(1);
    let mut current = Vec::with_capacity(batch.len().min(max_count));

    for group in group_by_partition(batch) {
        for document in group.documents {
            current.push(document);

            if current.len() >= max_count {
                planned.push(std::mem::take(&mut current));
            }
        }
    }

    if current.is_empty() {
        return;
    }

    if current.len() < options.min_batch_size_for_merge {
        if let Some(previous) = planned.last_mut() {
            if previous.len() + current.len() <= max_count {
                previous.append(&mut current);
                return;
            }
        }
    }

    planned.push(current);
}

fn group_by_partition(batch: Vec<Document>) -> Vec<PartitionGroup> {
    let mut groups: Vec<PartitionGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for document in batch {
        match index.get(document.partition_key()) {
            Some(&position) => groups[position].documents.push(document),
            None => {
                index.insert(document.partition_key().to_string(), groups.len());
                groups.push(PartitionGroup {
                    documents: vec![document],
                });
            }
        }
    }

    groups
}
