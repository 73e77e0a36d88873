//! Stamps the active trace and service identity onto log records.

pub mod layer;

pub use layer::CorrelationLayer;

use crate::domain::LogRecord;
use crate::instrument::RequestContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogCorrelator;

impl LogCorrelator {
    pub fn new() -> Self {
        Self
    }

    /// With a context, the record gets its trace id, span id and identity;
    /// without one it is returned as is.
    pub fn correlate(&self, ctx: Option<&RequestContext>, mut record: LogRecord) -> LogRecord {
        if let Some(ctx) = ctx {
            record.trace = Some(*ctx.trace());
            record.identity = Some(ctx.identity().clone());
        }
        record
    }

    /// Correlates against the context of the calling task.
    pub fn correlate_current(&self, record: LogRecord) -> LogRecord {
        self.correlate(RequestContext::current().as_ref(), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ServiceIdentity, Severity, SourceAttributes, TraceContext};

    fn record() -> LogRecord {
        LogRecord::new(Severity::Info, "Sales Invoice saved", SourceAttributes::tagged("frappe"))
    }

    fn context() -> RequestContext {
        RequestContext::new(
            TraceContext::new_root(),
            ServiceIdentity {
                tenant: Some("tenant-a".to_string()),
                service_name: "frappe-tenant-a".to_string(),
                service_version: "1.0.0".to_string(),
                environment: "production".to_string(),
            },
        )
    }

    #[test]
    fn stamps_trace_and_identity() {
        let ctx = context();
        let stamped = LogCorrelator::new().correlate(Some(&ctx), record());
        assert!(stamped.is_correlated());
        let trace = stamped.trace.unwrap();
        assert_eq!(trace.trace_id(), ctx.trace().trace_id());
        assert_eq!(trace.span_id(), ctx.trace().span_id());
        assert_eq!(stamped.identity.as_ref(), Some(ctx.identity()));
    }

    #[test]
    fn leaves_record_alone_without_context() {
        let original = record();
        let result = LogCorrelator::new().correlate(None, original.clone());
        assert_eq!(result, original);
        assert!(!result.is_correlated());
    }

    #[tokio::test]
    async fn correlate_current_reads_task_context() {
        let ctx = context();
        let expected = ctx.trace().trace_id();
        let stamped = ctx
            .scope(async { LogCorrelator::new().correlate_current(record()) })
            .await;
        assert_eq!(stamped.trace.map(|t| t.trace_id()), Some(expected));
        assert!(LogCorrelator::new().correlate_current(record()).trace.is_none());
    }
}
