use super::batch::ExportBatch;
use super::metrics::ExportStats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Sealed batches waiting for the delivery task.
///
/// Bounded: pushing into a full queue evicts the oldest batch and counts it.
#[derive(Debug)]
pub struct PendingQueue {
    batches: Mutex<VecDeque<ExportBatch>>,
    capacity: usize,
    notify: Notify,
    stats: Arc<ExportStats>,
}

impl PendingQueue {
    pub fn new(capacity: usize, stats: Arc<ExportStats>) -> Self {
        Self {
            batches: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            stats,
        }
    }

    /// Enqueues a batch, returning the evicted oldest batch if the queue was full.
    pub fn push(&self, batch: ExportBatch) -> Option<ExportBatch> {
        let evicted = {
            let mut batches = self.batches.lock();
            let evicted = if batches.len() >= self.capacity {
                batches.pop_front()
            } else {
                None
            };
            batches.push_back(batch);
            evicted
        };

        if let Some(ref dropped) = evicted {
            warn!(
                batch_id = dropped.id(),
                items = dropped.len(),
                "pending export queue full, dropping oldest batch"
            );
            self.stats.record_overflow_drop(dropped.len());
        }
        self.notify.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<ExportBatch> {
        self.batches.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    /// Resolves after the next push (or immediately if one is already pending).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
