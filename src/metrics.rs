use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing a single batch run.
///
/// One instance is created per run and passed by reference to the model client and the
/// orchestrator, so independent runs (and tests) never share counters.
#[derive(Default)]
pub struct BatchMetrics {
    model_calls: AtomicU64,
    persisted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl BatchMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the diagnostic number of the next model call (starting at 1).
    pub fn next_call_number(&self) -> u64 {
        self.model_calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a record whose extraction result was written.
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record whose existing output received refreshed metadata.
    pub fn record_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record that was not processed in this run.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record that ended in the failed state.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            model_calls: self.model_calls.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of batch counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Model calls issued, counting every retry attempt.
    pub model_calls: u64,
    /// Records whose extraction result was written.
    pub persisted: u64,
    /// Records whose metadata block was refreshed.
    pub updated: u64,
    /// Records skipped by policy.
    pub skipped: u64,
    /// Records that failed.
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_numbers_start_at_one_and_increase() {
        let metrics = BatchMetrics::new();
        assert_eq!(metrics.next_call_number(), 1);
        assert_eq!(metrics.next_call_number(), 2);
        assert_eq!(metrics.snapshot().model_calls, 2);
    }

    #[test]
    fn records_outcomes() {
        let metrics = BatchMetrics::new();
        metrics.record_persisted();
        metrics.record_persisted();
        metrics.record_skipped();
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.persisted, 2);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.updated, 0);
    }
}
