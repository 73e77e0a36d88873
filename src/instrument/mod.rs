//! Per-request and per-job tracing.
//!
//! [`InstrumentLayer`] wraps an HTTP service; [`Instrumentor::run_job`] does
//! the same for background jobs; [`child_span`] covers downstream calls made
//! while either is running.

pub mod context;
pub mod layer;

pub use context::{RequestContext, child_span};
pub use layer::{DURATION_METRIC, InstrumentLayer, InstrumentService};

use crate::buffer::ExporterHandle;
use crate::domain::{AttrValue, ServiceIdentityResolver, SpanKind, TraceContext};
use chrono::Utc;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Shared entry point for starting traced work.
///
/// Holds only read-only state plus an exporter handle, so one instance is
/// cloned into every service and job runner.
#[derive(Debug, Clone)]
pub struct Instrumentor {
    resolver: Arc<ServiceIdentityResolver>,
    exporter: ExporterHandle,
}

impl Instrumentor {
    pub fn new(resolver: ServiceIdentityResolver, exporter: ExporterHandle) -> Self {
        Self {
            resolver: Arc::new(resolver),
            exporter,
        }
    }

    pub fn resolver(&self) -> &ServiceIdentityResolver {
        &self.resolver
    }

    pub fn exporter(&self) -> &ExporterHandle {
        &self.exporter
    }

    pub fn layer(&self) -> InstrumentLayer {
        InstrumentLayer::new(self.clone())
    }

    /// Context for an inbound request: continues a well-formed `traceparent`
    /// and resolves the identity from the host.
    pub fn start_request(&self, traceparent: Option<&str>, host: Option<&str>) -> RequestContext {
        RequestContext::new(
            TraceContext::continue_or_start(traceparent),
            self.resolver.resolve(host),
        )
        .with_exporter(self.exporter.clone())
    }

    /// Traces a background job as a new root trace attributed to `site`.
    pub async fn run_job<F, T, E>(&self, site: Option<&str>, name: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let ctx = RequestContext::new(TraceContext::new_root(), self.resolver.resolve_site(site))
            .with_exporter(self.exporter.clone());
        let span = info_span!(
            "job",
            job = name,
            trace_id = %ctx.trace().trace_id(),
            span_id = %ctx.trace().span_id(),
            service.name = %ctx.identity().service_name,
            tenant = ctx.identity().tenant.as_deref().unwrap_or(""),
        );

        let start = Utc::now();
        let result = ctx.clone().scope(fut).instrument(span).await;
        let (status, events) = context::outcome_of(&result);
        ctx.finish_span(
            name.to_string(),
            SpanKind::Consumer,
            start,
            status,
            vec![("frappe.job".to_string(), AttrValue::from(name))],
            events,
        );
        result
    }
}
