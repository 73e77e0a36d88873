use super::Instrumentor;
use super::context::RequestContext;
use crate::domain::{AttrValue, Attributes, MetricRecord, SpanEvent, SpanKind, SpanStatus, TRACEPARENT_HEADER};

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::HOST;
use http::{Request, Response};
use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{Instrument, debug, field, info_span};

pub const DURATION_METRIC: &str = "http.server.duration";

/// Wraps a request handler with tracing, identity resolution and latency
/// measurement. Request, response and error types pass through unchanged.
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    instrumentor: Instrumentor,
}

impl InstrumentLayer {
    pub fn new(instrumentor: Instrumentor) -> Self {
        Self { instrumentor }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            instrumentor: self.instrumentor.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    instrumentor: Instrumentor,
}

/// Request facts captured before the request is handed to the inner service.
struct RequestFacts {
    method: String,
    target: String,
    host: Option<String>,
}

impl<S, B, ResBody> Service<Request<B>> for InstrumentService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let traceparent = req
            .headers()
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok());
        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()))
            .map(str::to_string);
        let ctx = self.instrumentor.start_request(traceparent, host.as_deref());
        let facts = RequestFacts {
            method: req.method().to_string(),
            target: req.uri().path().to_string(),
            host,
        };

        let span = info_span!(
            "http.request",
            trace_id = %ctx.trace().trace_id(),
            span_id = %ctx.trace().span_id(),
            service.name = %ctx.identity().service_name,
            tenant = ctx.identity().tenant.as_deref().unwrap_or(""),
            http.method = %facts.method,
            http.target = %facts.target,
            http.status_code = field::Empty,
        );

        // Timed from here so synchronous work inside the inner call counts.
        let start = Utc::now();
        let timer = Instant::now();
        // The synchronous part of the inner call also runs under the context.
        let inner = &mut self.inner;
        let fut = span.in_scope(|| ctx.clone().sync_scope(|| inner.call(req)));
        let instrumentor = self.instrumentor.clone();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(ctx.clone().scope(fut))
                .catch_unwind()
                .instrument(span.clone())
                .await;
            let duration_ms = timer.elapsed().as_secs_f64() * 1000.0;

            let mut attributes = facts.attributes();
            attributes.push(("http.duration_ms".to_string(), AttrValue::Float(duration_ms)));

            let (status, events, status_code) = match &outcome {
                Ok(Ok(response)) => {
                    let code = response.status().as_u16();
                    span.record("http.status_code", code);
                    attributes.push(("http.status_code".to_string(), AttrValue::from(code)));
                    let status = if code >= 500 {
                        SpanStatus::Error {
                            message: format!("HTTP {code}"),
                        }
                    } else {
                        SpanStatus::Ok
                    };
                    (status, Vec::new(), Some(code))
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    (
                        SpanStatus::Error {
                            message: message.clone(),
                        },
                        vec![SpanEvent::exception("error", message)],
                        None,
                    )
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    (
                        SpanStatus::Error {
                            message: message.clone(),
                        },
                        vec![SpanEvent::exception("panic", message)],
                        None,
                    )
                }
            };

            let name = format!("{} {}", facts.method, facts.target);
            let record = ctx.finish_span(name, SpanKind::Server, start, status, attributes, events);
            instrumentor.record_duration(&ctx, &facts.method, status_code, duration_ms);
            debug!(
                parent: &span,
                duration_ms,
                error = record.status.is_error(),
                "request finished"
            );

            match outcome {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        })
    }
}

impl RequestFacts {
    fn attributes(&self) -> Attributes {
        let mut attributes: Attributes = vec![
            ("http.method".to_string(), AttrValue::from(self.method.as_str())),
            ("http.target".to_string(), AttrValue::from(self.target.as_str())),
        ];
        if let Some(ref host) = self.host {
            attributes.push(("http.host".to_string(), AttrValue::from(host.as_str())));
        }
        attributes
    }
}

impl Instrumentor {
    fn record_duration(
        &self,
        ctx: &RequestContext,
        method: &str,
        status_code: Option<u16>,
        duration_ms: f64,
    ) {
        let mut attributes: Attributes = vec![("http.method".to_string(), AttrValue::from(method))];
        match status_code {
            Some(code) => attributes.push(("http.status_code".to_string(), AttrValue::from(code))),
            None => attributes.push(("error".to_string(), AttrValue::Bool(true))),
        }
        let metric = MetricRecord {
            name: DURATION_METRIC.to_string(),
            unit: "ms".to_string(),
            value: duration_ms,
            time: Utc::now(),
            attributes,
            identity: ctx.identity().clone(),
        };
        if let Err(e) = self.exporter().try_submit(metric) {
            debug!(error = %e, "duration metric not exported");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
