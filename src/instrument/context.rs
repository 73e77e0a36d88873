use crate::buffer::ExporterHandle;
use crate::domain::{
    Attributes, ServiceIdentity, SpanEvent, SpanKind, SpanRecord, SpanStatus, TraceContext,
};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use tracing::debug;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Trace and service identity of the request or job running on this task.
///
/// Installed with [`RequestContext::scope`]; each in-flight request has its
/// own value, so concurrent requests on one worker thread never observe each
/// other's context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace: TraceContext,
    identity: ServiceIdentity,
    exporter: Option<ExporterHandle>,
}

impl RequestContext {
    pub fn new(trace: TraceContext, identity: ServiceIdentity) -> Self {
        Self {
            trace,
            identity,
            exporter: None,
        }
    }

    /// Spans finished under this context are submitted to `exporter`.
    pub fn with_exporter(mut self, exporter: ExporterHandle) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Outbound `traceparent` header value for downstream calls.
    pub fn traceparent(&self) -> String {
        self.trace.to_traceparent()
    }

    /// Same identity, new child span of this context's span.
    pub fn child(&self) -> Self {
        Self {
            trace: self.trace.child(),
            identity: self.identity.clone(),
            exporter: self.exporter.clone(),
        }
    }

    /// The context of the enclosing scope, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }

    /// Builds the finished span for this context and hands it to the exporter.
    pub(crate) fn finish_span(
        &self,
        name: String,
        kind: SpanKind,
        start: DateTime<Utc>,
        status: SpanStatus,
        attributes: Attributes,
        events: Vec<SpanEvent>,
    ) -> SpanRecord {
        let record = SpanRecord {
            context: self.trace,
            name,
            kind,
            start,
            end: Utc::now(),
            status,
            attributes,
            events,
            identity: self.identity.clone(),
        };
        if let Some(ref exporter) = self.exporter {
            if let Err(e) = exporter.try_submit(record.clone()) {
                debug!(span = %record.name, error = %e, "span not exported");
            }
        }
        record
    }
}

/// Status and exception events for a finished fallible operation.
pub(crate) fn outcome_of<T, E: Display>(result: &Result<T, E>) -> (SpanStatus, Vec<SpanEvent>) {
    match result {
        Ok(_) => (SpanStatus::Ok, Vec::new()),
        Err(e) => {
            let message = e.to_string();
            (
                SpanStatus::Error {
                    message: message.clone(),
                },
                vec![SpanEvent::exception("error", message)],
            )
        }
    }
}

/// Runs downstream work (a database or cache call) as a child span of the
/// current request. Outside any request the future simply runs.
pub async fn child_span<F, T, E>(name: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let Some(parent) = RequestContext::current() else {
        return fut.await;
    };

    let child = parent.child();
    let start = Utc::now();
    let result = child.clone().scope(fut).await;
    let (status, events) = outcome_of(&result);
    child.finish_span(name.to_string(), SpanKind::Client, start, status, Vec::new(), events);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TelemetryItem;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            tenant: Some("tenant-a".to_string()),
            service_name: "frappe-tenant-a".to_string(),
            service_version: "1.0.0".to_string(),
            environment: "production".to_string(),
        }
    }

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert!(RequestContext::current().is_none());
        let ctx = RequestContext::new(TraceContext::new_root(), identity());
        let trace_id = ctx.trace().trace_id();
        let seen = ctx
            .scope(async { RequestContext::current().map(|c| c.trace().trace_id()) })
            .await;
        assert_eq!(seen, Some(trace_id));
        assert!(RequestContext::current().is_none());
    }

    #[tokio::test]
    async fn child_span_is_parented_and_exported() {
        let (exporter, mut rx) = ExporterHandle::channel(8);
        let ctx = RequestContext::new(TraceContext::new_root(), identity()).with_exporter(exporter);
        let parent_span = ctx.trace().span_id();

        let result: Result<u32, String> = ctx
            .clone()
            .scope(child_span("db.query", async { Err("deadlock".to_string()) }))
            .await;
        assert!(result.is_err());

        let Some(TelemetryItem::Span(span)) = rx.recv().await else {
            panic!("expected a span");
        };
        assert_eq!(span.name, "db.query");
        assert_eq!(span.kind, SpanKind::Client);
        assert_eq!(span.context.parent_span_id(), Some(parent_span));
        assert_eq!(span.context.trace_id(), ctx.trace().trace_id());
        assert!(span.status.is_error());
        assert_eq!(span.events[0].name, "exception");
    }

    #[tokio::test]
    async fn child_span_without_request_just_runs() {
        let result: Result<u8, String> = child_span("cache.get", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn traceparent_round_trips_through_header() {
        let ctx = RequestContext::new(TraceContext::new_root(), identity());
        let parsed = TraceContext::from_traceparent(&ctx.traceparent()).unwrap();
        assert_eq!(parsed.trace_id(), ctx.trace().trace_id());
        assert_eq!(parsed.span_id(), ctx.trace().span_id());
    }
}
