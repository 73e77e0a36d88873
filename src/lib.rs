//! Tenant-aware OpenTelemetry instrumentation for Frappe benches.
//!
//! Requests and background jobs get a trace context and a per-site service
//! identity, application logs are correlated with the active span, bench log
//! files are tailed, and everything leaves through one bounded OTLP/HTTP
//! exporter.

#![deny(warnings, rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Widening `as` casts on offsets and status codes read fine
    clippy::cast_possible_truncation, // Nanosecond timestamps and file offsets fit in u64
    clippy::cast_possible_wrap,       // OTLP fields take i64 for values that stay non-negative
    clippy::cast_precision_loss,      // Request durations reported as f64 milliseconds
    clippy::cast_sign_loss,           // Timestamps before the epoch are not produced
    clippy::missing_errors_doc,       // Error enums are documented at their definitions
    clippy::missing_panics_doc,       // Only the static traceparent regex can panic
    clippy::module_name_repetitions,  // e.g. SourceError in collector module
    clippy::must_use_candidate,       // Annotated selectively on builder-style APIs
    clippy::doc_markdown              // Header and attribute names in prose
)]

pub mod app;
pub mod buffer;
pub mod collector;
pub mod correlate;
pub mod domain;
pub mod instrument;
pub mod reliability;
pub mod sender;

pub use app::{App, Config};
pub use buffer::{BatchExporter, ExporterHandle};
pub use correlate::{CorrelationLayer, LogCorrelator};
pub use domain::{ServiceIdentity, TenantTable, TraceContext};
pub use instrument::{InstrumentLayer, Instrumentor, RequestContext};

/// Reported as the instrumentation scope version and in the user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
