//! OTLP protobuf encoding for export batches.
//!
//! A batch may mix logs, spans and measurements; each signal becomes its own
//! export request, with items grouped into one resource per ServiceIdentity.

use crate::buffer::ExportBatch;
use crate::domain::{
    AttrValue, LogRecord, MetricRecord, ServiceIdentity, SpanKind, SpanRecord, SpanStatus,
    TelemetryItem,
};
use crate::sender::ExportError;

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value};
use opentelemetry_proto::tonic::logs::v1::{
    LogRecord as OtlpLogRecord, ResourceLogs, ScopeLogs,
};
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, metric, number_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans, ScopeSpans, Span, Status, span, status,
};
use prost::Message;

const SCOPE_NAME: &str = "frappe-otel";

/// Protobuf bodies for the signals present in one batch.
#[derive(Debug, Default)]
pub struct EncodedBatch {
    pub logs: Option<Vec<u8>>,
    pub traces: Option<Vec<u8>>,
    pub metrics: Option<Vec<u8>>,
}

impl EncodedBatch {
    /// `(signal, body)` pairs in delivery order.
    pub fn requests(&self) -> impl Iterator<Item = (&'static str, &[u8])> {
        [
            ("traces", self.traces.as_deref()),
            ("metrics", self.metrics.as_deref()),
            ("logs", self.logs.as_deref()),
        ]
        .into_iter()
        .filter_map(|(signal, body)| body.map(|b| (signal, b)))
    }
}

/// Converts export batches to OTLP requests.
#[derive(Debug, Clone)]
pub struct OtlpSerializer {
    host_name: String,
    /// Resource for records that were emitted outside any request or job.
    fallback: ServiceIdentity,
    version: String,
}

impl OtlpSerializer {
    pub fn new(host_name: impl Into<String>, fallback: ServiceIdentity) -> Self {
        Self {
            host_name: host_name.into(),
            fallback,
            version: crate::VERSION.to_string(),
        }
    }

    pub fn encode(&self, batch: &ExportBatch) -> Result<EncodedBatch, ExportError> {
        if batch.is_empty() {
            return Err(ExportError::Serialization("empty batch".to_string()));
        }

        let mut logs = Vec::new();
        let mut spans = Vec::new();
        let mut metrics = Vec::new();
        for item in batch.items() {
            match item {
                TelemetryItem::Log(record) => logs.push(record),
                TelemetryItem::Span(span) => spans.push(span),
                TelemetryItem::Metric(metric) => metrics.push(metric),
            }
        }

        let mut encoded = EncodedBatch::default();
        if !logs.is_empty() {
            encoded.logs = Some(encode_message(&self.logs_request(&logs)));
        }
        if !spans.is_empty() {
            encoded.traces = Some(encode_message(&self.trace_request(&spans)));
        }
        if !metrics.is_empty() {
            encoded.metrics = Some(encode_message(&self.metrics_request(&metrics)));
        }
        Ok(encoded)
    }

    pub fn logs_request(&self, records: &[&LogRecord]) -> ExportLogsServiceRequest {
        let grouped = group_by_identity(records, |r| r.identity.as_ref(), &self.fallback);
        let resource_logs = grouped
            .into_iter()
            .map(|(identity, records)| ResourceLogs {
                resource: Some(self.resource(identity)),
                scope_logs: vec![ScopeLogs {
                    scope: Some(self.scope()),
                    log_records: records.into_iter().map(|r| self.log_record(r)).collect(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect();
        ExportLogsServiceRequest { resource_logs }
    }

    pub fn trace_request(&self, spans: &[&SpanRecord]) -> ExportTraceServiceRequest {
        let grouped = group_by_identity(spans, |s| Some(&s.identity), &self.fallback);
        let resource_spans = grouped
            .into_iter()
            .map(|(identity, spans)| ResourceSpans {
                resource: Some(self.resource(identity)),
                scope_spans: vec![ScopeSpans {
                    scope: Some(self.scope()),
                    spans: spans.into_iter().map(|s| self.span(s)).collect(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect();
        ExportTraceServiceRequest { resource_spans }
    }

    pub fn metrics_request(&self, measurements: &[&MetricRecord]) -> ExportMetricsServiceRequest {
        let grouped = group_by_identity(measurements, |m| Some(&m.identity), &self.fallback);
        let resource_metrics = grouped
            .into_iter()
            .map(|(identity, measurements)| ResourceMetrics {
                resource: Some(self.resource(identity)),
                scope_metrics: vec![ScopeMetrics {
                    scope: Some(self.scope()),
                    metrics: measurements.into_iter().map(|m| self.metric(m)).collect(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect();
        ExportMetricsServiceRequest { resource_metrics }
    }

    fn resource(&self, identity: &ServiceIdentity) -> Resource {
        let mut attributes = vec![
            string_kv("service.name", &identity.service_name),
            string_kv("service.version", &identity.service_version),
            string_kv("deployment.environment", &identity.environment),
            string_kv("host.name", &self.host_name),
            string_kv("telemetry.sdk.name", SCOPE_NAME),
            string_kv("telemetry.sdk.version", &self.version),
        ];
        if let Some(ref site) = identity.tenant {
            attributes.push(string_kv("frappe.site", site));
        }
        Resource {
            attributes,
            ..Default::default()
        }
    }

    fn scope(&self) -> InstrumentationScope {
        InstrumentationScope {
            name: SCOPE_NAME.to_string(),
            version: self.version.clone(),
            ..Default::default()
        }
    }

    fn log_record(&self, record: &LogRecord) -> OtlpLogRecord {
        let mut attributes = Vec::with_capacity(record.source.fields.len() + 2);
        if let Some(ref path) = record.source.file_path {
            attributes.push(string_kv("log.file.path", path));
        }
        if !record.source.tag.is_empty() {
            attributes.push(string_kv("log.tag", &record.source.tag));
        }
        for (key, value) in &record.source.fields {
            attributes.push(string_kv(key, value));
        }
        if let Some(ref site) = record.identity.as_ref().and_then(|i| i.tenant.clone()) {
            attributes.push(string_kv("tenant", site));
        }

        let (trace_id, span_id, flags) = match record.trace {
            Some(ref ctx) => (
                ctx.trace_id().to_bytes().to_vec(),
                ctx.span_id().to_bytes().to_vec(),
                u32::from(ctx.flags()),
            ),
            None => (Vec::new(), Vec::new(), 0),
        };

        OtlpLogRecord {
            time_unix_nano: unix_nanos(&record.timestamp),
            observed_time_unix_nano: unix_nanos(&Utc::now()),
            severity_number: record.severity.severity_number(),
            severity_text: record.severity.as_str().to_string(),
            body: Some(AnyValue {
                value: Some(any_value::Value::StringValue(record.message.clone())),
            }),
            attributes,
            flags,
            trace_id,
            span_id,
            ..Default::default()
        }
    }

    fn span(&self, record: &SpanRecord) -> Span {
        let kind = match record.kind {
            SpanKind::Server => span::SpanKind::Server,
            SpanKind::Internal => span::SpanKind::Internal,
            SpanKind::Client => span::SpanKind::Client,
            SpanKind::Consumer => span::SpanKind::Consumer,
        };
        let status = match record.status {
            SpanStatus::Unset => Status::default(),
            SpanStatus::Ok => Status {
                code: status::StatusCode::Ok as i32,
                ..Default::default()
            },
            SpanStatus::Error { ref message } => Status {
                message: message.clone(),
                code: status::StatusCode::Error as i32,
                ..Default::default()
            },
        };

        Span {
            trace_id: record.context.trace_id().to_bytes().to_vec(),
            span_id: record.context.span_id().to_bytes().to_vec(),
            parent_span_id: record
                .context
                .parent_span_id()
                .map(|id| id.to_bytes().to_vec())
                .unwrap_or_default(),
            flags: u32::from(record.context.flags()),
            name: record.name.clone(),
            kind: kind as i32,
            start_time_unix_nano: unix_nanos(&record.start),
            end_time_unix_nano: unix_nanos(&record.end),
            attributes: record.attributes.iter().map(|(k, v)| attr_kv(k, v)).collect(),
            events: record
                .events
                .iter()
                .map(|event| span::Event {
                    time_unix_nano: unix_nanos(&event.time),
                    name: event.name.clone(),
                    attributes: event.attributes.iter().map(|(k, v)| attr_kv(k, v)).collect(),
                    ..Default::default()
                })
                .collect(),
            status: Some(status),
            ..Default::default()
        }
    }

    fn metric(&self, record: &MetricRecord) -> Metric {
        let point = NumberDataPoint {
            attributes: record.attributes.iter().map(|(k, v)| attr_kv(k, v)).collect(),
            time_unix_nano: unix_nanos(&record.time),
            value: Some(number_data_point::Value::AsDouble(record.value)),
            ..Default::default()
        };
        Metric {
            name: record.name.clone(),
            unit: record.unit.clone(),
            data: Some(metric::Data::Gauge(Gauge {
                data_points: vec![point],
            })),
            ..Default::default()
        }
    }
}

/// Groups items by identity, keeping first-appearance order.
fn group_by_identity<'a, T>(
    items: &[&'a T],
    identity_of: impl Fn(&'a T) -> Option<&'a ServiceIdentity>,
    fallback: &'a ServiceIdentity,
) -> Vec<(&'a ServiceIdentity, Vec<&'a T>)> {
    let mut groups: Vec<(&ServiceIdentity, Vec<&T>)> = Vec::new();
    for &item in items {
        let identity = identity_of(item).unwrap_or(fallback);
        match groups.iter_mut().find(|(id, _)| *id == identity) {
            Some((_, members)) => members.push(item),
            None => groups.push((identity, vec![item])),
        }
    }
    groups
}

fn encode_message<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

fn unix_nanos(time: &DateTime<Utc>) -> u64 {
    time.timestamp_nanos_opt().unwrap_or(0).max(0) as u64
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn attr_kv(key: &str, value: &AttrValue) -> KeyValue {
    let value = match value {
        AttrValue::Str(s) => any_value::Value::StringValue(s.clone()),
        AttrValue::Int(i) => any_value::Value::IntValue(*i),
        AttrValue::Float(f) => any_value::Value::DoubleValue(*f),
        AttrValue::Bool(b) => any_value::Value::BoolValue(*b),
    };
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchType;
    use crate::domain::{Severity, SourceAttributes, TraceContext};

    fn identity(tenant: Option<&str>, service: &str) -> ServiceIdentity {
        ServiceIdentity {
            tenant: tenant.map(str::to_string),
            service_name: service.to_string(),
            service_version: "1.0.0".to_string(),
            environment: "production".to_string(),
        }
    }

    fn serializer() -> OtlpSerializer {
        OtlpSerializer::new("bench-01", identity(None, "frappe"))
    }

    fn resource_attr(resource: &Resource, key: &str) -> Option<String> {
        resource.attributes.iter().find(|kv| kv.key == key).and_then(|kv| {
            match kv.value.as_ref()?.value.as_ref()? {
                any_value::Value::StringValue(s) => Some(s.clone()),
                _ => None,
            }
        })
    }

    #[test]
    fn logs_group_by_identity_with_fallback() {
        let mut tenant_log = LogRecord::new(Severity::Error, "boom", SourceAttributes::tagged("web"));
        tenant_log.identity = Some(identity(Some("tenant-a"), "frappe-tenant-a"));
        tenant_log.trace = Some(TraceContext::new_root());
        let plain = LogRecord::new(Severity::Info, "ready", SourceAttributes::tagged("worker"));
        let second = tenant_log.clone();

        let request = serializer().logs_request(&[&tenant_log, &plain, &second]);
        assert_eq!(request.resource_logs.len(), 2);

        let first = &request.resource_logs[0];
        let resource = first.resource.as_ref().unwrap();
        assert_eq!(resource_attr(resource, "service.name").as_deref(), Some("frappe-tenant-a"));
        assert_eq!(resource_attr(resource, "frappe.site").as_deref(), Some("tenant-a"));
        assert_eq!(resource_attr(resource, "host.name").as_deref(), Some("bench-01"));

        let records = &first.scope_logs[0].log_records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity_number, 17);
        assert_eq!(records[0].trace_id.len(), 16);
        assert_eq!(records[0].span_id.len(), 8);

        let fallback = request.resource_logs[1].resource.as_ref().unwrap();
        assert_eq!(resource_attr(fallback, "service.name").as_deref(), Some("frappe"));
        assert_eq!(resource_attr(fallback, "frappe.site"), None);
        assert!(request.resource_logs[1].scope_logs[0].log_records[0].trace_id.is_empty());
    }

    #[test]
    fn error_span_carries_status_and_parent() {
        let parent = TraceContext::new_root();
        let ctx = parent.child();
        let now = Utc::now();
        let record = SpanRecord {
            context: ctx,
            name: "GET /api/method/ping".to_string(),
            kind: SpanKind::Server,
            start: now,
            end: now,
            status: SpanStatus::Error {
                message: "HTTP 500".to_string(),
            },
            attributes: vec![("http.status_code".to_string(), AttrValue::Int(500))],
            events: vec![],
            identity: identity(None, "frappe"),
        };

        let request = serializer().trace_request(&[&record]);
        let span = &request.resource_spans[0].scope_spans[0].spans[0];
        assert_eq!(span.kind, span::SpanKind::Server as i32);
        assert_eq!(span.parent_span_id, parent.span_id().to_bytes().to_vec());
        let status = span.status.as_ref().unwrap();
        assert_eq!(status.code, status::StatusCode::Error as i32);
        assert_eq!(status.message, "HTTP 500");
    }

    #[test]
    fn encode_splits_signals() {
        let log = LogRecord::new(Severity::Info, "line", SourceAttributes::tagged("web"));
        let metric = MetricRecord {
            name: "http.server.duration".to_string(),
            unit: "ms".to_string(),
            value: 12.5,
            time: Utc::now(),
            attributes: vec![],
            identity: identity(None, "frappe"),
        };
        let batch = ExportBatch::new(vec![log.into(), metric.into()], BatchType::SizeBased);

        let encoded = serializer().encode(&batch).unwrap();
        assert!(encoded.logs.is_some());
        assert!(encoded.metrics.is_some());
        assert!(encoded.traces.is_none());
        let signals: Vec<_> = encoded.requests().map(|(s, _)| s).collect();
        assert_eq!(signals, vec!["metrics", "logs"]);

        let decoded = ExportMetricsServiceRequest::decode(encoded.metrics.unwrap().as_slice()).unwrap();
        let metric = &decoded.resource_metrics[0].scope_metrics[0].metrics[0];
        assert_eq!(metric.name, "http.server.duration");
    }

    #[test]
    fn empty_batch_is_rejected() {
        let batch = ExportBatch::new(vec![], BatchType::Shutdown);
        assert!(matches!(serializer().encode(&batch), Err(ExportError::Serialization(_))));
    }
}
