//! Counters for watch activity.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lightweight counters updated by the event loop and the registrar.
///
/// Purely observational: nothing reads these to make control-flow decisions.
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    /// Batches that reached the listener-notification step
    pub batches_processed: AtomicU64,
    /// Individual entries seen across all batches
    pub entries_seen: AtomicU64,
    /// Directories registered, at construction or dynamically
    pub directories_registered: AtomicU64,
    /// Batches discarded because their handle was already forgotten
    pub stale_batches: AtomicU64,
    /// Overflow signals skipped
    pub overflow_events: AtomicU64,
}

impl WatcherMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch that completed the notification step
    pub fn record_batch_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the entries delivered in one batch
    pub fn record_entries(&self, count: usize) {
        self.entries_seen.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a directory registration
    pub fn record_registration(&self) {
        self.directories_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch discarded for an unknown handle
    pub fn record_stale_batch(&self) {
        self.stale_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an overflow signal
    pub fn record_overflow(&self) {
        self.overflow_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Log current counters
    pub fn log_metrics(&self) {
        info!(
            "Watcher metrics: batches={}, entries={}, registered={}, stale={}, overflow={}",
            self.batches_processed.load(Ordering::Relaxed),
            self.entries_seen.load(Ordering::Relaxed),
            self.directories_registered.load(Ordering::Relaxed),
            self.stale_batches.load(Ordering::Relaxed),
            self.overflow_events.load(Ordering::Relaxed)
        );
    }
}
