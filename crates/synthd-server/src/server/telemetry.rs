//! Logging initialization and process-wide engine counters.
//!
//! Logging uses `tracing` with an `EnvFilter` (controlled by `RUST_LOG`);
//! the counters are plain process atomics mutated by the dispatcher and read
//! by the metrics surface.

use std::time::Duration;

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops (which keeps tests that share a process happy).
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Process-wide generation counters.
///
/// Mutated only by the dispatcher on job completion or abort; the metrics
/// endpoint reads a snapshot. Failures touch neither counter.
#[derive(Debug, Default)]
pub struct EngineCounters {
    total_generated: AtomicU64,
    total_duration_ms: AtomicU64,
    completed_jobs: AtomicU64,
    aborted_jobs: AtomicU64,
}

/// Point-in-time view of [`EngineCounters`], serialized by `/metrics`.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub total_generated: u64,
    pub total_duration_ms: u64,
    pub completed_jobs: u64,
    pub aborted_jobs: u64,
}

impl EngineCounters {
    pub fn record_completed(&self, delivered: u64, elapsed: Duration) {
        self.total_generated.fetch_add(delivered, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_generated: self.total_generated.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            aborted_jobs: self.aborted_jobs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_and_abort_touch_disjoint_counters() {
        let counters = EngineCounters::default();
        counters.record_completed(100, Duration::from_millis(40));
        counters.record_aborted();

        let snap = counters.snapshot();
        assert_eq!(snap.total_generated, 100);
        assert_eq!(snap.total_duration_ms, 40);
        assert_eq!(snap.completed_jobs, 1);
        assert_eq!(snap.aborted_jobs, 1);
    }
}
