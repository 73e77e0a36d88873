use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every producer and the exporter tasks.
#[derive(Debug, Default)]
pub struct ExportStats {
    items_accepted: AtomicU64,
    items_dropped_intake: AtomicU64,
    batches_sealed: AtomicU64,
    batches_sent: AtomicU64,
    items_sent: AtomicU64,
    failed_attempts: AtomicU64,
    batches_dropped_retries: AtomicU64,
    batches_dropped_overflow: AtomicU64,
    items_dropped_export: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStatsSnapshot {
    pub items_accepted: u64,
    pub items_dropped_intake: u64,
    pub batches_sealed: u64,
    pub batches_sent: u64,
    pub items_sent: u64,
    pub failed_attempts: u64,
    pub batches_dropped_retries: u64,
    pub batches_dropped_overflow: u64,
    pub items_dropped_export: u64,
}

impl ExportStatsSnapshot {
    /// Batches that were given up on for any reason.
    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped_retries + self.batches_dropped_overflow
    }
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.items_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intake_drop(&self) {
        self.items_dropped_intake.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sealed(&self) {
        self.batches_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, items: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.items_sent.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_drop(&self, items: usize) {
        self.batches_dropped_retries.fetch_add(1, Ordering::Relaxed);
        self.items_dropped_export.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn record_overflow_drop(&self, items: usize) {
        self.batches_dropped_overflow.fetch_add(1, Ordering::Relaxed);
        self.items_dropped_export.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExportStatsSnapshot {
        ExportStatsSnapshot {
            items_accepted: self.items_accepted.load(Ordering::Relaxed),
            items_dropped_intake: self.items_dropped_intake.load(Ordering::Relaxed),
            batches_sealed: self.batches_sealed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            items_sent: self.items_sent.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            batches_dropped_retries: self.batches_dropped_retries.load(Ordering::Relaxed),
            batches_dropped_overflow: self.batches_dropped_overflow.load(Ordering::Relaxed),
            items_dropped_export: self.items_dropped_export.load(Ordering::Relaxed),
        }
    }
}
