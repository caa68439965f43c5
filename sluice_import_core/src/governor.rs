//! Throughput governor.
//!
//! The governor models the store's provisioned throughput as a token bucket
//! that replenishes continuously at `capacity` RCU per second, plus a minimum
//! interval between two admissions on the same partition key.
//!
//! Admission decisions are serialized by a single lock. Credits are allowed to
//! go negative: a request that costs more than what is left waits for the
//! deficit once, then debits the full cost. The debt is settled by the
//! replenishment of the following admissions.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytesize::ByteSize;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{CancelledSnafu, FatalConfigurationSnafu, Result},
    store::StoreError,
};

/// Minimum interval between two admissions on the same partition key.
pub const DEFAULT_PARTITION_COOLDOWN: Duration = Duration::from_millis(100);
/// Buffered bytes above which producers are paused.
pub const DEFAULT_BUFFERED_BYTES_THRESHOLD: u64 = 1024 * 1024 * 1024;
/// How long producers are paused when too many bytes are buffered.
pub const DEFAULT_BACKPRESSURE_PAUSE: Duration = Duration::from_secs(1);

/// Number of synthetic sub-keys used by [`ThroughputGovernor::distributed_key`].
const DISTRIBUTED_KEY_FAN_OUT: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct GovernorOptions {
    /// Provisioned throughput, in RCU per second.
    pub capacity: f64,
    pub partition_cooldown: Duration,
    pub buffered_bytes_threshold: u64,
    pub backpressure_pause: Duration,
}

/// Bytes accepted by the ingest queue that are not written or failed yet.
#[derive(Debug, Clone, Default)]
pub struct BufferedBytes(Arc<AtomicU64>);

#[derive(Debug)]
pub struct ThroughputGovernor {
    options: GovernorOptions,
    state: Mutex<GovernorState>,
    buffered: BufferedBytes,
}

#[derive(Debug)]
struct GovernorState {
    budget: RateBudget,
    /// Last admission time of every partition key seen so far.
    partitions: HashMap<String, Instant>,
}

#[derive(Debug)]
struct RateBudget {
    remaining_credits: f64,
    last_replenish: Instant,
}

impl GovernorOptions {
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            partition_cooldown: DEFAULT_PARTITION_COOLDOWN,
            buffered_bytes_threshold: DEFAULT_BUFFERED_BYTES_THRESHOLD,
            backpressure_pause: DEFAULT_BACKPRESSURE_PAUSE,
        }
    }
}

impl ThroughputGovernor {
    /// Creates a new governor with a full credit pool.
    ///
    /// Fails if the capacity is not a positive number.
    pub fn new(options: GovernorOptions) -> Result<Self> {
        if !options.capacity.is_finite() || options.capacity <= 0.0 {
            return FatalConfigurationSnafu {
                message: format!("capacity must be a positive number, got {}", options.capacity),
            }
            .fail();
        }

        let budget = RateBudget {
            remaining_credits: options.capacity,
            last_replenish: Instant::now(),
        };

        Ok(Self {
            options,
            state: Mutex::new(GovernorState {
                budget,
                partitions: HashMap::new(),
            }),
            buffered: BufferedBytes::default(),
        })
    }

    pub fn options(&self) -> &GovernorOptions {
        &self.options
    }

    /// Waits until a request of `cost` on `partition_key` can be sent.
    ///
    /// Returns [`ImportError::Cancelled`](crate::error::ImportError::Cancelled)
    /// if the token is cancelled while waiting. The internal lock is released
    /// in that case.
    pub async fn admit(&self, cost: f64, partition_key: &str, ct: &CancellationToken) -> Result<()> {
        let capacity = self.options.capacity;
        let cost = if cost.is_nan() { 0.0 } else { cost.max(0.0) };

        let mut state = tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            state = self.state.lock() => state,
        };

        state.budget.replenish(Instant::now(), capacity);

        let remaining = state.budget.remaining_credits;
        if remaining < cost {
            let wait = credit_wait(cost - remaining, capacity);
            debug!(cost, remaining, ?wait, "Waiting for credits");
            sleep_or_cancel(wait, ct).await?;
        }

        if let Some(last_access) = state.partitions.get(partition_key).copied() {
            let since = Instant::now().saturating_duration_since(last_access);
            if since < self.options.partition_cooldown {
                let wait = self.options.partition_cooldown - since;
                debug!(partition_key, ?wait, "Waiting for partition cooldown");
                sleep_or_cancel(wait, ct).await?;
            }
        }

        let now = Instant::now();
        state.budget.remaining_credits -= cost;
        state.budget.last_replenish = now;
        match state.partitions.get_mut(partition_key) {
            Some(last_access) => *last_access = now,
            None => {
                state.partitions.insert(partition_key.to_string(), now);
            }
        }

        Ok(())
    }

    /// Handles a failed write, returning whether it should be retried.
    ///
    /// Rate limited requests are retried after the store's hint, or after an
    /// exponential backoff when the store didn't provide one. All other errors
    /// are not retried at this layer.
    pub async fn on_rejection(
        &self,
        error: &StoreError,
        attempt: u32,
        ct: &CancellationToken,
    ) -> Result<bool> {
        let StoreError::RateLimited { retry_after } = error else {
            return Ok(false);
        };

        let delay = retry_after.unwrap_or_else(|| exponential_backoff(attempt));
        debug!(attempt, ?delay, "Request rate limited. Retrying");
        sleep_or_cancel(delay, ct).await?;

        Ok(true)
    }

    /// Spreads `base_key` over one of ten stable sub-keys.
    pub fn distributed_key(base_key: &str) -> String {
        let hash = blake3::hash(base_key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        let n = u64::from_le_bytes(prefix) % DISTRIBUTED_KEY_FAN_OUT;
        format!("{base_key}-{n}")
    }

    /// Pauses the caller when too many bytes are buffered ahead of the writers.
    pub async fn memory_backpressure(&self, ct: &CancellationToken) -> Result<()> {
        let buffered = self.buffered.current();
        if buffered <= self.options.buffered_bytes_threshold {
            return Ok(());
        }

        warn!(
            buffered = %ByteSize(buffered),
            threshold = %ByteSize(self.options.buffered_bytes_threshold),
            "Too many buffered bytes. Pausing producer"
        );
        sleep_or_cancel(self.options.backpressure_pause, ct).await
    }

    /// Returns the gauge of buffered bytes shared with the ingest queue and the executor.
    pub fn buffered(&self) -> &BufferedBytes {
        &self.buffered
    }

    /// Returns the current credits, without replenishing them.
    pub async fn remaining_credits(&self) -> f64 {
        self.state.lock().await.budget.remaining_credits
    }
}

impl RateBudget {
    fn replenish(&mut self, now: Instant, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_replenish).as_secs_f64();
        self.remaining_credits = capacity.min(self.remaining_credits + elapsed * capacity);
    }
}

impl BufferedBytes {
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release(&self, bytes: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Time for `capacity` to replenish `deficit` credits, saturating at [`Duration::MAX`].
fn credit_wait(deficit: f64, capacity: f64) -> Duration {
    Duration::try_from_secs_f64(deficit / capacity).unwrap_or(Duration::MAX)
}

/// Returns `2^attempt` seconds.
pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Sleeps for `duration`, returning early with an error if the token is cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, ct: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = ct.cancelled() => CancelledSnafu {}.fail(),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
