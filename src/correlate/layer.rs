use super::LogCorrelator;
use crate::buffer::ExporterHandle;
use crate::domain::{LogRecord, Severity, SourceAttributes};

use std::collections::BTreeMap;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Targets whose events would feed back into the export path.
const SKIPPED_TARGETS: &[&str] = &[
    "frappe_otel::buffer",
    "frappe_otel::sender",
    "frappe_otel::reliability",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "tower",
];

/// Ships `tracing` events as correlated log records.
#[derive(Debug, Clone)]
pub struct CorrelationLayer {
    correlator: LogCorrelator,
    exporter: ExporterHandle,
    max_level: Level,
}

impl CorrelationLayer {
    pub fn new(exporter: ExporterHandle, max_level: Level) -> Self {
        Self {
            correlator: LogCorrelator::new(),
            exporter,
            max_level,
        }
    }

    fn is_skipped(target: &str) -> bool {
        SKIPPED_TARGETS.iter().any(|skipped| {
            target
                .strip_prefix(skipped)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S: Subscriber> Layer<S> for CorrelationLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level || Self::is_skipped(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut fields = visitor.fields;
        if let Some(module) = metadata.module_path() {
            fields.insert("code.namespace".to_string(), module.to_string());
        }
        let source = SourceAttributes {
            file_path: None,
            tag: metadata.target().to_string(),
            fields,
        };
        let record = LogRecord::new(Severity::from(metadata.level()), visitor.message, source);
        let record = self.correlator.correlate_current(record);

        // Logging a failed submit from here would recurse; the drop is counted.
        let _ = self.exporter.try_submit(record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}
