use serde::{Deserialize, Serialize};

/// Severity of a shipped log record.
///
/// This is distinct from the console `LogLevel` in `app::config`, which only
/// configures this process's own tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// OTLP `SeverityNumber` for the base level of each range.
    pub fn severity_number(self) -> i32 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }

    /// Best-effort severity of a raw log line, `Info` when nothing matches.
    pub fn infer(line: &str) -> Self {
        let head: String = line.chars().take(120).collect::<String>().to_ascii_uppercase();
        if head.contains("CRITICAL") || head.contains("FATAL") {
            Severity::Fatal
        } else if head.contains("ERROR") || head.contains("TRACEBACK") {
            Severity::Error
        } else if head.contains("WARNING") || head.contains("WARN") {
            Severity::Warn
        } else if head.contains("DEBUG") {
            Severity::Debug
        } else {
            Severity::Info
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}
