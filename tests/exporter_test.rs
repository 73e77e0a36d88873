use frappe_otel::app::config::ExportConfig;
use frappe_otel::buffer::{BatchExporter, ExportBatch, IntakeError};
use frappe_otel::domain::{LogRecord, Severity, SourceAttributes, TelemetryItem};
use frappe_otel::reliability::RetryConfig;
use frappe_otel::sender::{ExportError, Transport};

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

/// Fails every delivery with the configured error.
struct FailingTransport {
    attempts: AtomicU32,
    status: Option<u16>,
}

impl FailingTransport {
    fn unavailable() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            status: None,
        }
    }

    fn rejecting(status: u16) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            status: Some(status),
        }
    }
}

impl Transport for FailingTransport {
    async fn deliver(&self, _batch: &ExportBatch) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.status {
            Some(status) => Err(ExportError::Rejected {
                status,
                message: "rejected".to_string(),
            }),
            None => Err(ExportError::Unavailable("collector down".to_string())),
        }
    }
}

/// Fails the first `failures` deliveries, then records batch sizes.
struct FlakyTransport {
    failures: AtomicU32,
    delivered: Mutex<Vec<usize>>,
}

impl Transport for FlakyTransport {
    async fn deliver(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExportError::Timeout(Duration::from_millis(1)));
        }
        self.delivered.lock().push(batch.len());
        Ok(())
    }
}

fn log(n: usize) -> TelemetryItem {
    LogRecord::new(Severity::Info, format!("line {n}"), SourceAttributes::tagged("frappe.web")).into()
}

fn config(batch_size: usize, intake_capacity: usize, max_attempts: u32) -> ExportConfig {
    ExportConfig {
        batch_size,
        flush_interval: Duration::from_millis(20),
        intake_capacity,
        retry: RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        },
        ..ExportConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_batches_are_dropped_after_attempt_ceiling() {
    let transport = Arc::new(FailingTransport::unavailable());
    let exporter = BatchExporter::spawn(&config(5, 64, 3), transport.clone());
    let handle = exporter.handle();

    for n in 0..10 {
        assert_ok!(handle.try_submit(log(n)));
    }
    wait_until(|| handle.stats().batches_dropped_retries == 2).await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 6);
    let stats = exporter.shutdown().await;
    assert_eq!(stats.items_sent, 0);
    assert_eq!(stats.items_dropped_export, 10);
    assert_eq!(stats.failed_attempts, 6);
}

#[tokio::test]
async fn test_client_rejection_is_not_retried() {
    let transport = Arc::new(FailingTransport::rejecting(400));
    let exporter = BatchExporter::spawn(&config(2, 64, 5), transport.clone());
    let handle = exporter.handle();

    assert_ok!(handle.try_submit(log(0)));
    assert_ok!(handle.try_submit(log(1)));
    wait_until(|| handle.stats().batches_dropped_retries == 1).await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    exporter.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_delivered() {
    let transport = Arc::new(FlakyTransport {
        failures: AtomicU32::new(2),
        delivered: Mutex::new(Vec::new()),
    });
    let exporter = BatchExporter::spawn(&config(3, 64, 5), transport.clone());
    let handle = exporter.handle();

    for n in 0..3 {
        assert_ok!(handle.try_submit(log(n)));
    }
    wait_until(|| handle.stats().batches_sent == 1).await;

    let stats = exporter.shutdown().await;
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.items_sent, 3);
    assert_eq!(*transport.delivered.lock(), vec![3]);
}

#[tokio::test]
async fn test_producers_never_block_on_a_failing_collector() {
    let transport = Arc::new(FailingTransport::unavailable());
    let exporter = BatchExporter::spawn(&config(4, 8, 100), transport);
    let handle = exporter.handle();

    let start = Instant::now();
    let mut full = 0_u64;
    for n in 0..10_000 {
        if handle.try_submit(log(n)) == Err(IntakeError::Full) {
            full += 1;
        }
    }
    assert!(start.elapsed() < Duration::from_secs(2));

    let waited = Instant::now();
    let _ = handle.submit(log(0), Duration::from_millis(20)).await;
    assert!(waited.elapsed() < Duration::from_secs(1));

    let stats = handle.stats();
    assert_eq!(stats.items_accepted + stats.items_dropped_intake, 10_001);
    assert!(full > 0);
    assert!(stats.items_dropped_intake >= full);

    // Shutdown gives each pending batch one attempt instead of the full retry budget.
    let shutdown = tokio::time::timeout(Duration::from_secs(5), exporter.shutdown()).await;
    assert!(shutdown.is_ok());
}

#[tokio::test]
async fn test_pending_queue_overflow_drops_oldest_batches() {
    let transport = Arc::new(FailingTransport::unavailable());
    let mut cfg = config(1, 256, 1000);
    cfg.max_pending_batches = 2;
    cfg.retry.base_delay = Duration::from_secs(60);
    cfg.retry.max_delay = Duration::from_secs(60);
    let exporter = BatchExporter::spawn(&cfg, transport);
    let handle = exporter.handle();

    for n in 0..20 {
        assert_ok!(handle.try_submit(log(n)));
    }
    wait_until(|| handle.stats().batches_sealed == 20).await;

    let stats = handle.stats();
    assert!(stats.batches_dropped_overflow >= 17);
    exporter.shutdown().await;
}
