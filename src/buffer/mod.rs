//! Exporter intake, batching and the bounded pending queue.

pub mod batch;
pub mod exporter;
pub mod metrics;
pub mod queue;

pub use batch::{BatchType, ExportBatch};
pub use exporter::{BatchExporter, ExporterHandle, IntakeError};
pub use metrics::{ExportStats, ExportStatsSnapshot};
pub use queue::PendingQueue;
