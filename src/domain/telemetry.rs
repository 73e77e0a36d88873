use super::identity::ServiceIdentity;
use super::log_record::LogRecord;
use super::trace_context::TraceContext;
use chrono::{DateTime, Utc};

/// Attribute value attached to spans and measurements.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u16> for AttrValue {
    fn from(value: u16) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

pub type Attributes = Vec<(String, AttrValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Server,
    Internal,
    Client,
    Consumer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: String },
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

/// A timed annotation on a span; exceptions are recorded this way.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn exception(kind: &str, message: impl Into<String>) -> Self {
        Self {
            name: "exception".to_string(),
            time: Utc::now(),
            attributes: vec![
                ("exception.type".to_string(), AttrValue::from(kind)),
                ("exception.message".to_string(), AttrValue::Str(message.into())),
            ],
        }
    }
}

/// A finished span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub context: TraceContext,
    pub name: String,
    pub kind: SpanKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SpanStatus,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub identity: ServiceIdentity,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// A single measurement, exported as a gauge data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub time: DateTime<Utc>,
    pub attributes: Attributes,
    pub identity: ServiceIdentity,
}

/// Unit of exporter intake.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryItem {
    Log(LogRecord),
    Span(SpanRecord),
    Metric(MetricRecord),
}

impl TelemetryItem {
    pub fn identity(&self) -> Option<&ServiceIdentity> {
        match self {
            TelemetryItem::Log(record) => record.identity.as_ref(),
            TelemetryItem::Span(span) => Some(&span.identity),
            TelemetryItem::Metric(metric) => Some(&metric.identity),
        }
    }

    pub fn as_log(&self) -> Option<&LogRecord> {
        match self {
            TelemetryItem::Log(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_span(&self) -> Option<&SpanRecord> {
        match self {
            TelemetryItem::Span(span) => Some(span),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricRecord> {
        match self {
            TelemetryItem::Metric(metric) => Some(metric),
            _ => None,
        }
    }
}

impl From<LogRecord> for TelemetryItem {
    fn from(record: LogRecord) -> Self {
        TelemetryItem::Log(record)
    }
}

impl From<SpanRecord> for TelemetryItem {
    fn from(span: SpanRecord) -> Self {
        TelemetryItem::Span(span)
    }
}

impl From<MetricRecord> for TelemetryItem {
    fn from(metric: MetricRecord) -> Self {
        TelemetryItem::Metric(metric)
    }
}
