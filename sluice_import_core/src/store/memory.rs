//! In-memory implementation of the document store.
//!
//! This implementation simulates a store with provisioned throughput: every
//! write is charged according to a [`CostModel`] against a one second budget,
//! and writes that exceed the budget are rejected with a retry hint. It is
//! suitable for testing and development.
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, Entry};
use serde_json::Value;
use tokio::{sync::Mutex, time::Instant};

use crate::document::Document;

use super::{DocumentStore, StoreError};

const BUDGET_WINDOW: Duration = Duration::from_secs(1);

/// How writes of existing documents are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Existing documents are replaced.
    #[default]
    Upsert,
    /// Existing documents are rejected with [`StoreError::Conflict`].
    Create,
}

/// The cost charged for a write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// Fixed cost of a write.
    pub base_cost: f64,
    /// Additional cost for every KiB of document.
    pub cost_per_kib: f64,
}

#[derive(Debug)]
struct BudgetWindow {
    started: Instant,
    consumed: f64,
}

#[derive(Debug)]
pub struct InMemoryDocumentStore {
    /// Map of (partition key, document id) to the stored document.
    documents: DashMap<(String, String), Value>,
    capacity: u64,
    mode: WriteMode,
    cost_model: CostModel,
    window: Mutex<BudgetWindow>,
}

impl InMemoryDocumentStore {
    /// Create a new in-memory store with the given provisioned capacity.
    pub fn new(capacity: u64) -> Self {
        Self {
            documents: DashMap::new(),
            capacity,
            mode: WriteMode::default(),
            cost_model: CostModel::default(),
            window: Mutex::new(BudgetWindow {
                started: Instant::now(),
                consumed: 0.0,
            }),
        }
    }

    /// Change how writes of existing documents are handled.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Change the cost charged for writes.
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the stored document, if any.
    pub fn get(&self, partition_key: &str, id: &str) -> Option<Value> {
        self.documents
            .get(&(partition_key.to_string(), id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Charges `cost` against the current window, or returns how long to wait.
    async fn charge(&self, cost: f64) -> Result<(), StoreError> {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= BUDGET_WINDOW {
            window.started = now;
            window.consumed = 0.0;
        }

        // A single write larger than the whole budget is admitted on an empty window.
        if window.consumed > 0.0 && window.consumed + cost > self.capacity as f64 {
            let retry_after = BUDGET_WINDOW.saturating_sub(now.saturating_duration_since(window.started));
            return Err(StoreError::RateLimited {
                retry_after: Some(retry_after),
            });
        }

        window.consumed += cost;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn write(&self, document: &Document, partition_key: &str) -> Result<f64, StoreError> {
        let cost = self.cost_model.cost(document.size_bytes());
        self.charge(cost).await?;

        let key = (partition_key.to_string(), document.id().to_string());
        match (self.documents.entry(key), self.mode) {
            (Entry::Occupied(_), WriteMode::Create) => {
                return Err(StoreError::Conflict {
                    id: document.id().to_string(),
                });
            }
            (Entry::Occupied(mut entry), WriteMode::Upsert) => {
                entry.insert(document.minimized());
            }
            (Entry::Vacant(entry), _) => {
                entry.insert(document.minimized());
            }
        }

        Ok(cost)
    }

    async fn read_provisioned_capacity(&self) -> Result<u64, StoreError> {
        Ok(self.capacity)
    }
}

impl CostModel {
    pub fn cost(&self, size_bytes: u64) -> f64 {
        self.base_cost + (size_bytes as f64 / 1024.0) * self.cost_per_kib
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            base_cost: 5.0,
            cost_per_kib: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(id: &str) -> Document {
        Document::new(id, "p0", json!({ "id": id, "value": null }))
    }

    #[tokio::test]
    async fn test_upsert_stores_minimized_document() {
        let store = InMemoryDocumentStore::new(1_000);

        let cost = store.write(&doc("a"), "p0").await.unwrap();
        assert!(cost > 5.0);
        store.write(&doc("a"), "p0").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("p0", "a"), Some(json!({ "id": "a" })));
    }

    #[tokio::test]
    async fn test_create_mode_conflicts() {
        let store = InMemoryDocumentStore::new(1_000).with_write_mode(WriteMode::Create);

        store.write(&doc("a"), "p0").await.unwrap();
        let err = store.write(&doc("a"), "p0").await.unwrap_err();
        assert_eq!(err, StoreError::Conflict { id: "a".to_string() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_when_budget_is_exhausted() {
        let store = InMemoryDocumentStore::new(10).with_cost_model(CostModel {
            base_cost: 4.0,
            cost_per_kib: 0.0,
        });

        store.write(&doc("a"), "p0").await.unwrap();
        store.write(&doc("b"), "p0").await.unwrap();

        tokio::time::advance(Duration::from_millis(300)).await;
        let err = store.write(&doc("c"), "p0").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::RateLimited {
                retry_after: Some(Duration::from_millis(700))
            }
        );

        tokio::time::advance(Duration::from_millis(700)).await;
        store.write(&doc("c"), "p0").await.unwrap();
        assert_eq!(store.len(), 3);
    }
}
