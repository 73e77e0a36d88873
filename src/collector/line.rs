//! Turns one tailed line into message, severity and extra fields.
//!
//! Plain lines keep their text and get a keyword-inferred severity. Lines
//! that are a JSON object (Frappe's monitor and structured RQ logs) are
//! unpacked: the message and level keys are lifted out and every other
//! top-level key becomes a field.

use crate::domain::Severity;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MESSAGE_KEYS: &[&str] = &["message", "msg", "event"];
const LEVEL_KEYS: &[&str] = &["level", "levelname", "severity"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub message: String,
    pub severity: Severity,
    pub fields: BTreeMap<String, String>,
}

pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
            return parse_structured(line, obj);
        }
    }
    ParsedLine {
        message: line.to_string(),
        severity: Severity::infer(line),
        fields: BTreeMap::new(),
    }
}

fn parse_structured(line: &str, mut obj: Map<String, Value>) -> ParsedLine {
    let message = take_first_str(&mut obj, MESSAGE_KEYS);
    let severity = take_first_str(&mut obj, LEVEL_KEYS)
        .and_then(|level| severity_from_name(&level))
        .unwrap_or_else(|| match message {
            Some(ref m) => Severity::infer(m),
            None => Severity::Info,
        });

    let fields = obj
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    ParsedLine {
        // Without a message key the whole object is the message.
        message: message.unwrap_or_else(|| line.to_string()),
        severity,
        fields,
    }
}

fn take_first_str(obj: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(_)) => match obj.remove(*key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    })
}

fn severity_from_name(name: &str) -> Option<Severity> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Severity::Trace),
        "debug" => Some(Severity::Debug),
        "info" | "information" | "notice" => Some(Severity::Info),
        "warn" | "warning" => Some(Severity::Warn),
        "error" | "err" => Some(Severity::Error),
        "critical" | "fatal" | "panic" => Some(Severity::Fatal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_infer_severity_from_keywords() {
        let parsed = parse_line("2024-05-01 10:00:00 WARNING frappe.utils slow query");
        assert_eq!(parsed.severity, Severity::Warn);
        assert_eq!(parsed.message, "2024-05-01 10:00:00 WARNING frappe.utils slow query");
        assert!(parsed.fields.is_empty());
    }

    #[test]
    fn json_lines_are_unpacked() {
        let parsed = parse_line(
            r#"{"level": "error", "message": "Job failed", "site": "tenant-a", "duration": 1532, "job": null}"#,
        );
        assert_eq!(parsed.message, "Job failed");
        assert_eq!(parsed.severity, Severity::Error);
        assert_eq!(parsed.fields["site"], "tenant-a");
        assert_eq!(parsed.fields["duration"], "1532");
        assert!(!parsed.fields.contains_key("level"));
        assert!(!parsed.fields.contains_key("job"));
    }

    #[test]
    fn json_without_message_keeps_the_line() {
        let line = r#"{"transaction_type": "request", "path": "/api/method/ping"}"#;
        let parsed = parse_line(line);
        assert_eq!(parsed.message, line);
        assert_eq!(parsed.severity, Severity::Info);
        assert_eq!(parsed.fields["path"], "/api/method/ping");
    }

    #[test]
    fn broken_json_falls_back_to_plain_text() {
        let parsed = parse_line("{ ERROR not json");
        assert_eq!(parsed.message, "{ ERROR not json");
        assert_eq!(parsed.severity, Severity::Error);
    }
}
