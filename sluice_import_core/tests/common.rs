#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde_json::json;
use sluice_import_core::{
    Batch, Document, DocumentStore, ExecutorOptions, GovernorOptions, PipelineExecutor,
    StoreError, ThroughputGovernor,
};

type WriteHandler = dyn Fn(&Document, u32) -> Result<f64, StoreError> + Send + Sync;

/// A store whose writes are answered by a handler.
///
/// The handler receives the document and the number of times it was written,
/// starting at 1.
pub struct ScriptedStore {
    handler: Box<WriteHandler>,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(
        handler: impl Fn(&Document, u32) -> Result<f64, StoreError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A store that accepts every write with the given cost.
    pub fn accepting(cost: f64) -> Self {
        Self::new(move |_, _| Ok(cost))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, id: &str) -> u32 {
        self.calls
            .lock()
            .expect("calls lock")
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn write(&self, document: &Document, _partition_key: &str) -> Result<f64, StoreError> {
        let call = {
            let mut calls = self.calls.lock().expect("calls lock");
            let call = calls.entry(document.id().to_string()).or_default();
            *call += 1;
            *call
        };

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(document, call)
    }

    async fn read_provisioned_capacity(&self) -> Result<u64, StoreError> {
        Ok(100_000)
    }
}

pub fn document(i: usize, partition_key: &str) -> Document {
    Document::new(i.to_string(), partition_key, json!({ "id": i.to_string(), "n": i }))
}

/// Creates `count` batches of `size` documents, each document on its own partition.
pub fn batches(count: usize, size: usize) -> Vec<Batch> {
    (0..count)
        .map(|b| {
            let documents = (0..size)
                .map(|i| {
                    let id = b * size + i;
                    document(id, &format!("p{id}"))
                })
                .collect();
            Batch::new(documents).expect("non-empty batch")
        })
        .collect()
}

pub fn batch_stream(batches: Vec<Batch>) -> impl Stream<Item = Batch> {
    stream::iter(batches)
}

/// A governor with plenty of capacity and no partition cooldown.
pub fn unconstrained_governor() -> Arc<ThroughputGovernor> {
    let governor = ThroughputGovernor::new(GovernorOptions {
        partition_cooldown: Duration::ZERO,
        ..GovernorOptions::new(1_000_000.0)
    })
    .expect("valid capacity");
    Arc::new(governor)
}

pub fn executor(store: Arc<ScriptedStore>, options: ExecutorOptions) -> PipelineExecutor {
    PipelineExecutor::new(store, unconstrained_governor(), options)
}
