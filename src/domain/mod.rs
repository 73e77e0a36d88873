//! Domain layer for frappe-otel.
//!
//! Contains the canonical types shared across all modules:
//! - `ServiceIdentity` / `TenantTable`: who telemetry is attributed to
//! - `TraceContext`: W3C trace identity of the current step
//! - `LogRecord`, `SpanRecord`, `MetricRecord`: what gets exported

pub mod identity;
pub mod log_level;
pub mod log_record;
pub mod telemetry;
pub mod trace_context;

pub use identity::{ServiceIdentity, ServiceIdentityResolver, TenantTable, normalize_host};
pub use log_level::Severity;
pub use log_record::{LogRecord, SourceAttributes};
pub use telemetry::{
    AttrValue, Attributes, MetricRecord, SpanEvent, SpanKind, SpanRecord, SpanStatus,
    TelemetryItem,
};
pub use trace_context::{SpanId, TRACEPARENT_HEADER, TraceContext, TraceId, TraceparentError};
