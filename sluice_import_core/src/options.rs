//! Import configuration.
//!
//! All options have defaults, so an empty JSON object is a valid
//! configuration. Field names are camel case in serialized form.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{FatalConfigurationSnafu, Result},
    executor::{
        DEFAULT_INITIAL_COST_ESTIMATE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT_BATCHES,
        DEFAULT_PROGRESS_INTERVAL, DEFAULT_SMALLER_BATCH_SIZE, ExecutorOptions, ShrinkPolicy,
    },
    governor::{DEFAULT_BUFFERED_BYTES_THRESHOLD, GovernorOptions},
    planner::{
        DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_COUNT, DEFAULT_MIN_BATCH_SIZE_FOR_MERGE,
        PlannerOptions,
    },
    store::DEFAULT_FALLBACK_CAPACITY,
};

/// Number of documents gathered before planning.
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_PARTITION_COOLDOWN_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    /// Number of documents gathered from the ingest queue before planning.
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub min_time_between_batches_ms: u64,
    pub max_attempts: u32,
    pub smaller_batch_size: usize,
    pub max_batch_bytes: u64,
    pub max_batch_count: usize,
    pub min_batch_size_for_merge: usize,
    /// Provisioned throughput in RCU per second. Read from the store if missing.
    pub ru_capacity: Option<u64>,
    pub partition_cooldown_ms: u64,
    /// Capacity of the ingest queue. Defaults to four times `batch_size`.
    pub queue_capacity: Option<usize>,
    pub shrink_policy: ShrinkPolicy,
    pub progress_interval: usize,
    pub initial_cost_estimate: f64,
    pub buffered_bytes_threshold: u64,
    /// Capacity used when the store's capacity cannot be read.
    pub fallback_capacity: u64,
}

impl ImportOptions {
    /// Checks that the options can be used to run an import.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batchSize", self.batch_size as u64),
            ("maxConcurrentBatches", self.max_concurrent_batches as u64),
            ("maxAttempts", self.max_attempts as u64),
            ("smallerBatchSize", self.smaller_batch_size as u64),
            ("maxBatchBytes", self.max_batch_bytes),
            ("maxBatchCount", self.max_batch_count as u64),
            ("fallbackCapacity", self.fallback_capacity),
        ];

        for (name, value) in positive {
            if value == 0 {
                return FatalConfigurationSnafu {
                    message: format!("{name} must be greater than zero"),
                }
                .fail();
            }
        }

        if self.ru_capacity == Some(0) {
            return FatalConfigurationSnafu {
                message: "ruCapacity must be greater than zero",
            }
            .fail();
        }

        if self.queue_capacity == Some(0) {
            return FatalConfigurationSnafu {
                message: "queueCapacity must be greater than zero",
            }
            .fail();
        }

        if !self.initial_cost_estimate.is_finite() || self.initial_cost_estimate < 0.0 {
            return FatalConfigurationSnafu {
                message: "initialCostEstimate must be a non-negative number",
            }
            .fail();
        }

        Ok(())
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.batch_size.saturating_mul(4))
            .max(1)
    }

    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            max_batch_count: self.max_batch_count,
            max_batch_bytes: self.max_batch_bytes,
            min_batch_size_for_merge: self.min_batch_size_for_merge,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            max_concurrent_batches: self.max_concurrent_batches,
            min_time_between_batches: Duration::from_millis(self.min_time_between_batches_ms),
            max_attempts: self.max_attempts,
            smaller_batch_size: self.smaller_batch_size,
            shrink_policy: self.shrink_policy,
            progress_interval: self.progress_interval,
            initial_cost_estimate: self.initial_cost_estimate,
        }
    }

    pub fn governor_options(&self, capacity: u64) -> GovernorOptions {
        GovernorOptions {
            partition_cooldown: Duration::from_millis(self.partition_cooldown_ms),
            buffered_bytes_threshold: self.buffered_bytes_threshold,
            ..GovernorOptions::new(capacity as f64)
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            min_time_between_batches_ms: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            smaller_batch_size: DEFAULT_SMALLER_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            min_batch_size_for_merge: DEFAULT_MIN_BATCH_SIZE_FOR_MERGE,
            ru_capacity: None,
            partition_cooldown_ms: DEFAULT_PARTITION_COOLDOWN_MS,
            queue_capacity: None,
            shrink_policy: ShrinkPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            initial_cost_estimate: DEFAULT_INITIAL_COST_ESTIMATE,
            buffered_bytes_threshold: DEFAULT_BUFFERED_BYTES_THRESHOLD,
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
        }
    }
}
