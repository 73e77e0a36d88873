use super::config::LogLevel;
use crate::buffer::ExporterHandle;
use crate::correlate::CorrelationLayer;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies kept at `warn` regardless of the configured level.
const DEFAULT_DIRECTIVES: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("h2", "warn"),
    ("tower", "warn"),
    ("tonic", "warn"),
];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to set global tracing subscriber: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// `RUST_LOG_FORMAT=json` switches console output to JSON.
pub fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(DEFAULT_DIRECTIVES.len() + 1);
    parts.push(level.as_str().to_string());
    parts.extend(
        DEFAULT_DIRECTIVES
            .iter()
            .map(|(target, level)| format!("{target}={level}")),
    );
    parts.join(",")
}

/// `RUST_LOG` wins when set; otherwise the configured level plus the
/// dependency defaults.
fn env_filter(level: LogLevel) -> Result<EnvFilter, LoggingError> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| build_filter_string(level));
    EnvFilter::try_new(&filter).map_err(|source| LoggingError::InvalidFilter { filter, source })
}

/// Installs the global subscriber: filter, console output and, when an
/// exporter is given, the correlation layer that ships events as log records.
pub fn setup_logging(
    level: LogLevel,
    json: bool,
    exporter: Option<ExporterHandle>,
) -> Result<(), LoggingError> {
    let correlation = exporter.map(|handle| CorrelationLayer::new(handle, level.into()));
    let registry = tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(correlation);

    if json {
        registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true).compact())
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_string_starts_with_level_and_quiets_http_stack() {
        let filter = build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn second_initialization_is_an_error_not_a_panic() {
        let first = setup_logging(LogLevel::Info, false, None);
        let second = setup_logging(LogLevel::Info, false, None);
        assert!(first.is_ok() || second.is_err());
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized(_))));
    }
}
