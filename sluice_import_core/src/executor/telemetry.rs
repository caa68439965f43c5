use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Totals of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub documents_written: u64,
    /// Sum of the costs returned by the store, in RCU.
    pub total_cost: f64,
    pub batches_written: u64,
    /// Batches that exhausted their attempts.
    pub batches_failed: u64,
    pub documents_failed: u64,
    /// Documents moved to a new batch after a shrunk attempt succeeded.
    pub requeued_documents: u64,
    /// Documents discarded after a shrunk attempt succeeded.
    pub documents_dropped: u64,
    /// Writes rejected by the store's admission control.
    pub rejected_writes: u64,
    pub elapsed: Duration,
    /// Whether the run stopped because it was cancelled.
    pub cancelled: bool,
}

/// Progress of a run, in batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Counters shared by all batch workers of a run.
///
/// Costs are accumulated in thousandths of RCU so that the total does not
/// depend on the order in which batches complete.
#[derive(Debug, Default)]
pub(crate) struct RunTelemetry {
    documents_written: AtomicU64,
    cost_milli: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    documents_failed: AtomicU64,
    documents_requeued: AtomicU64,
    documents_dropped: AtomicU64,
    rejected_writes: AtomicU64,
}

impl RunTelemetry {
    pub fn record_written(&self, documents: usize, cost: f64) {
        let milli = (cost.max(0.0) * 1000.0).round() as u64;
        self.documents_written
            .fetch_add(documents as u64, Ordering::Relaxed);
        self.cost_milli.fetch_add(milli, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, documents: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.documents_failed
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub fn record_requeued(&self, documents: usize) {
        self.documents_requeued
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, documents: usize) {
        self.documents_dropped
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, elapsed: Duration, cancelled: bool) -> RunSummary {
        RunSummary {
            documents_written: self.documents_written.load(Ordering::Relaxed),
            total_cost: self.cost_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            requeued_documents: self.documents_requeued.load(Ordering::Relaxed),
            documents_dropped: self.documents_dropped.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            elapsed,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_totals() {
        let telemetry = RunTelemetry::default();
        telemetry.record_written(100, 512.25);
        telemetry.record_written(25, 100.5);
        telemetry.record_failed(40);
        telemetry.record_requeued(75);
        telemetry.record_rejected();
        telemetry.record_rejected();

        let summary = telemetry.summary(Duration::from_secs(3), false);
        assert_eq!(summary.documents_written, 125);
        assert_eq!(summary.total_cost, 612.75);
        assert_eq!(summary.batches_written, 2);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.documents_failed, 40);
        assert_eq!(summary.requeued_documents, 75);
        assert_eq!(summary.documents_dropped, 0);
        assert_eq!(summary.rejected_writes, 2);
        assert!(!summary.cancelled);
    }
}
