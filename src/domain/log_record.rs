use super::identity::ServiceIdentity;
use super::log_level::Severity;
use super::trace_context::TraceContext;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Where a record came from: a tailed file or an in-process logger target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceAttributes {
    pub file_path: Option<String>,
    pub tag: String,
    /// Extra attributes (server metadata, structured log fields, offsets).
    pub fields: BTreeMap<String, String>,
}

impl SourceAttributes {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }
}

/// A log line ready for export.
///
/// `identity` and `trace` are both absent when the record was emitted
/// outside any traced request or job.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub source: SourceAttributes,
    pub identity: Option<ServiceIdentity>,
    pub trace: Option<TraceContext>,
}

impl LogRecord {
    pub fn new(severity: Severity, message: impl Into<String>, source: SourceAttributes) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            source,
            identity: None,
            trace: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_correlated(&self) -> bool {
        self.trace.is_some()
    }
}
