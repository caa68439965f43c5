use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CancelledSnafu, Result},
    governor::sleep_or_cancel,
};

/// Weight of the latest observed cost in the running estimate.
const COST_SMOOTHING: f64 = 0.2;

/// Enforces a minimum interval between two attempt dispatches, across all workers.
#[derive(Debug)]
pub(crate) struct DispatchPacer {
    interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

/// Running estimate of the cost of writing one document.
///
/// Admission happens before the store reports the actual cost, so the
/// governor is charged with this estimate.
#[derive(Debug)]
pub(crate) struct CostEstimator {
    /// Bits of the current `f64` estimate.
    estimate: AtomicU64,
}

impl DispatchPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Waits until the next dispatch is allowed, then records it.
    pub async fn wait(&self, ct: &CancellationToken) -> Result<()> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let mut last_dispatch = tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            last_dispatch = self.last_dispatch.lock() => last_dispatch,
        };

        if let Some(last) = *last_dispatch {
            let since = Instant::now().saturating_duration_since(last);
            if since < self.interval {
                sleep_or_cancel(self.interval - since, ct).await?;
            }
        }

        *last_dispatch = Some(Instant::now());
        Ok(())
    }
}

impl CostEstimator {
    pub fn new(initial: f64) -> Self {
        Self {
            estimate: AtomicU64::new(initial.to_bits()),
        }
    }

    pub fn estimate(&self) -> f64 {
        f64::from_bits(self.estimate.load(Ordering::Relaxed))
    }

    pub fn observe(&self, cost: f64) {
        if !cost.is_finite() || cost < 0.0 {
            return;
        }

        let _ = self
            .estimate
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = current + COST_SMOOTHING * (cost - current);
                Some(next.to_bits())
            });
    }
}
