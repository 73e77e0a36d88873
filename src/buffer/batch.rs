use crate::domain::TelemetryItem;
use std::time::Instant;
use uuid::Uuid;

/// Why the batcher sealed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    SizeBased,
    TimeBased,
    Shutdown,
}

/// Ordered telemetry awaiting delivery.
///
/// Lives from sealing until it is delivered or dropped; `attempts` never
/// exceeds the configured attempt ceiling.
#[derive(Debug, Clone)]
pub struct ExportBatch {
    id: String,
    items: Vec<TelemetryItem>,
    sealed_by: BatchType,
    attempts: u32,
    sealed_at: Instant,
}

impl ExportBatch {
    pub fn new(items: Vec<TelemetryItem>, sealed_by: BatchType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            items,
            sealed_by,
            attempts: 0,
            sealed_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn items(&self) -> &[TelemetryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn batch_type(&self) -> BatchType {
        self.sealed_by
    }

    /// Records a failed delivery and returns the number of attempts so far.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn enqueued_at(&self) -> Instant {
        self.sealed_at
    }
}
