use super::batch::{BatchType, ExportBatch};
use super::metrics::{ExportStats, ExportStatsSnapshot};
use super::queue::PendingQueue;
use crate::app::config::ExportConfig;
use crate::domain::TelemetryItem;
use crate::reliability::RetryPolicy;
use crate::sender::{ExportError, Transport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeError {
    #[error("exporter intake is full")]
    Full,
    #[error("exporter is shut down")]
    Closed,
    #[error("timed out waiting for exporter intake")]
    Timeout,
}

/// Producer side of the exporter intake.
///
/// Cheap to clone; every instrumented request, the correlation layer and each
/// watcher hold one. Submission never propagates export failures.
#[derive(Debug, Clone)]
pub struct ExporterHandle {
    tx: mpsc::Sender<TelemetryItem>,
    stats: Arc<ExportStats>,
    closed: Arc<AtomicBool>,
}

impl ExporterHandle {
    /// A handle backed by a plain channel, for wiring producers without a
    /// running exporter.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TelemetryItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            tx,
            stats: Arc::new(ExportStats::new()),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// Non-blocking submit; a full intake drops the item and counts it.
    pub fn try_submit(&self, item: impl Into<TelemetryItem>) -> Result<(), IntakeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IntakeError::Closed);
        }
        match self.tx.try_send(item.into()) {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.record_intake_drop();
                Err(IntakeError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(IntakeError::Closed),
        }
    }

    /// Waits up to `wait` for intake room, then drops the item and counts it.
    pub async fn submit(&self, item: impl Into<TelemetryItem>, wait: Duration) -> Result<(), IntakeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IntakeError::Closed);
        }
        match timeout(wait, self.tx.send(item.into())).await {
            Ok(Ok(())) => {
                self.stats.record_accepted();
                Ok(())
            }
            Ok(Err(_)) => Err(IntakeError::Closed),
            Err(_) => {
                self.stats.record_intake_drop();
                Err(IntakeError::Timeout)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ExportStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Batching exporter: one intake, one batcher task, one delivery task.
pub struct BatchExporter {
    handle: ExporterHandle,
    stats: Arc<ExportStats>,
    shutdown: CancellationToken,
    batcher: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

impl BatchExporter {
    /// Spawns the batcher and delivery tasks on the current runtime.
    pub fn spawn<T>(config: &ExportConfig, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        let stats = Arc::new(ExportStats::new());
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let handle = ExporterHandle {
            tx,
            stats: stats.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let queue = Arc::new(PendingQueue::new(config.max_pending_batches, stats.clone()));
        let shutdown = CancellationToken::new();
        let batcher_done = CancellationToken::new();

        let batcher = Batcher {
            rx,
            queue: queue.clone(),
            stats: stats.clone(),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            shutdown: shutdown.clone(),
            done: batcher_done.clone(),
        };
        let delivery = Delivery {
            transport: Arc::new(transport),
            queue,
            stats: stats.clone(),
            policy: RetryPolicy::new(config.retry.clone()),
            attempt_timeout: config.timeout,
            shutdown: shutdown.clone(),
            batcher_done,
        };

        info!(
            batch_size = config.batch_size,
            flush_interval = ?config.flush_interval,
            intake_capacity = config.intake_capacity,
            max_pending_batches = config.max_pending_batches,
            max_attempts = config.retry.max_attempts,
            "starting batch exporter"
        );

        Self {
            handle,
            stats,
            shutdown,
            batcher: tokio::spawn(batcher.run()),
            delivery: tokio::spawn(delivery.run()),
        }
    }

    pub fn handle(&self) -> ExporterHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> ExportStatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes the intake, seals the partial batch and gives every pending
    /// batch one final delivery attempt.
    pub async fn shutdown(self) -> ExportStatsSnapshot {
        self.handle.closed.store(true, Ordering::Release);
        self.shutdown.cancel();

        if let Err(e) = self.batcher.await {
            warn!("batcher task ended abnormally: {e}");
        }
        if let Err(e) = self.delivery.await {
            warn!("delivery task ended abnormally: {e}");
        }

        let stats = self.stats.snapshot();
        info!(
            batches_sent = stats.batches_sent,
            items_sent = stats.items_sent,
            batches_dropped = stats.batches_dropped(),
            items_dropped_intake = stats.items_dropped_intake,
            "batch exporter stopped"
        );
        stats
    }
}

struct Batcher {
    rx: mpsc::Receiver<TelemetryItem>,
    queue: Arc<PendingQueue>,
    stats: Arc<ExportStats>,
    batch_size: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl Batcher {
    async fn run(mut self) {
        let mut current = Vec::with_capacity(self.batch_size);
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(item) => {
                        current.push(item);
                        if current.len() >= self.batch_size {
                            self.seal(&mut current, BatchType::SizeBased);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !current.is_empty() {
                        self.seal(&mut current, BatchType::TimeBased);
                    }
                }
            }
        }

        // Anything already queued in the channel still belongs to this run.
        self.rx.close();
        while let Ok(item) = self.rx.try_recv() {
            current.push(item);
            if current.len() >= self.batch_size {
                self.seal(&mut current, BatchType::Shutdown);
            }
        }
        if !current.is_empty() {
            self.seal(&mut current, BatchType::Shutdown);
        }
        self.done.cancel();
        debug!("batcher stopped");
    }

    fn seal(&self, current: &mut Vec<TelemetryItem>, batch_type: BatchType) {
        let items = std::mem::replace(current, Vec::with_capacity(self.batch_size));
        let batch = ExportBatch::new(items, batch_type);
        debug!(batch_id = batch.id(), items = batch.len(), ?batch_type, "sealed batch");
        self.stats.record_sealed();
        self.queue.push(batch);
    }
}

struct Delivery<T> {
    transport: Arc<T>,
    queue: Arc<PendingQueue>,
    stats: Arc<ExportStats>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    shutdown: CancellationToken,
    batcher_done: CancellationToken,
}

impl<T: Transport> Delivery<T> {
    async fn run(self) {
        loop {
            // Read before draining: once the batcher is done every batch it
            // produced is already in the queue.
            let finished = self.batcher_done.is_cancelled();
            while let Some(batch) = self.queue.pop() {
                if self.shutdown.is_cancelled() {
                    self.final_attempt(batch).await;
                } else {
                    self.deliver_with_retry(batch).await;
                }
            }
            if finished {
                break;
            }
            tokio::select! {
                () = self.queue.notified() => {}
                () = self.batcher_done.cancelled() => {}
            }
        }
        debug!("delivery task stopped");
    }

    async fn attempt(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        match timeout(self.attempt_timeout, self.transport.deliver(batch)).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout(self.attempt_timeout)),
        }
    }

    async fn deliver_with_retry(&self, mut batch: ExportBatch) {
        loop {
            let error = match self.attempt(&batch).await {
                Ok(()) => {
                    self.record_delivered(&batch);
                    return;
                }
                Err(error) => error,
            };

            self.stats.record_failed_attempt();
            let attempts = batch.record_failure();
            if !error.is_retryable() || self.policy.should_give_up(attempts) {
                warn!(
                    batch_id = batch.id(),
                    items = batch.len(),
                    attempts,
                    error = %error,
                    "dropping batch after failed delivery"
                );
                self.stats.record_retry_drop(batch.len());
                return;
            }

            let delay = self.policy.calculate_delay(attempts - 1);
            debug!(batch_id = batch.id(), attempts, ?delay, error = %error, "retrying batch");
            tokio::select! {
                () = sleep(delay) => {}
                () = self.shutdown.cancelled() => {
                    self.final_attempt(batch).await;
                    return;
                }
            }
        }
    }

    /// One attempt without backoff, used while shutting down.
    async fn final_attempt(&self, mut batch: ExportBatch) {
        match self.attempt(&batch).await {
            Ok(()) => self.record_delivered(&batch),
            Err(error) => {
                self.stats.record_failed_attempt();
                let attempts = batch.record_failure();
                warn!(
                    batch_id = batch.id(),
                    items = batch.len(),
                    attempts,
                    error = %error,
                    "dropping batch after final delivery attempt"
                );
                self.stats.record_retry_drop(batch.len());
            }
        }
    }

    fn record_delivered(&self, batch: &ExportBatch) {
        debug!(
            batch_id = batch.id(),
            items = batch.len(),
            sealed_by = ?batch.batch_type(),
            queued_for = ?batch.enqueued_at().elapsed(),
            "batch delivered"
        );
        self.stats.record_sent(batch.len());
    }
}
