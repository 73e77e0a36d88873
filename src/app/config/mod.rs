mod cli;
mod env_helpers;
pub mod groups;
pub mod registry;
mod validation;

use crate::collector::LogSource;
use crate::domain::{ServiceIdentityResolver, TenantTable};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

pub use cli::Cli;
pub use groups::{Compression, ExportConfig, ServerOverrides, WatchConfig};
pub use registry::RegistryFile;
pub use validation::{parse_endpoint, parse_headers, parse_tenant_sites};

use env_helpers::{load_env_string, load_env_string_opt, load_env_var, non_empty};

pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "OTEL_SERVICE_VERSION";
pub const ENV_ENVIRONMENT: &str = "OTEL_DEPLOYMENT_ENVIRONMENT";

pub const DEFAULT_SERVICE_NAME: &str = "frappe";
pub const DEFAULT_SERVICE_VERSION: &str = "1.0.0";
pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_TENANT_PREFIX: &str = "frappe";
pub const DEFAULT_BENCH_ROOT: &str = "/home/frappe/frappe-bench";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid headers: {0}")]
    InvalidHeaders(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Console log level of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as ValueEnum>::from_str(s.trim(), true)
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Process-wide telemetry configuration.
///
/// Resolved once at startup from the environment and shared read-only (behind
/// an `Arc`) by every component; nothing re-reads the environment afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub endpoint: Url,
    pub headers: BTreeMap<String, String>,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub tenants: TenantTable,
    pub sources: Vec<LogSource>,
    pub server: ServerOverrides,
    pub export: ExportConfig,
    pub watch: WatchConfig,
    pub log_level: LogLevel,
}

impl Config {
    /// Resolves the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the configuration from an arbitrary variable lookup.
    ///
    /// Identical lookups always produce identical configurations; a missing
    /// endpoint is an error, never a silent default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_raw = non_empty(lookup(ENV_ENDPOINT)).ok_or(ConfigError::Missing(ENV_ENDPOINT))?;
        let endpoint = parse_endpoint(&endpoint_raw)?;
        let headers = parse_headers(&lookup(ENV_HEADERS).unwrap_or_default())?;

        let mut service_name = DEFAULT_SERVICE_NAME.to_string();
        let mut service_version = DEFAULT_SERVICE_VERSION.to_string();
        let mut environment = DEFAULT_ENVIRONMENT.to_string();
        load_env_string(&lookup, ENV_SERVICE_NAME, &mut service_name);
        load_env_string(&lookup, ENV_SERVICE_VERSION, &mut service_version);
        load_env_string(&lookup, ENV_ENVIRONMENT, &mut environment);

        let mut prefix = DEFAULT_TENANT_PREFIX.to_string();
        load_env_string(&lookup, "OTEL_TENANT_PREFIX", &mut prefix);
        let mut tenants = TenantTable::new(prefix);
        if let Some(sites) = non_empty(lookup("OTEL_TENANT_SITES")) {
            parse_tenant_sites(&sites, &mut tenants)?;
        }

        let mut sources = Vec::new();
        if let Some(path) = non_empty(lookup("OTEL_REGISTRY_FILE")) {
            let registry = RegistryFile::load(&path)?;
            registry.apply(&mut tenants, &mut sources)?;
        }
        if sources.is_empty() {
            let mut bench_root = DEFAULT_BENCH_ROOT.to_string();
            load_env_string(&lookup, "OTEL_BENCH_ROOT", &mut bench_root);
            sources = LogSource::frappe_bench_defaults(&bench_root);
        }

        let mut server = ServerOverrides::default();
        load_env_string_opt(&lookup, "OTEL_SERVER_NAME", &mut server.name);
        load_env_string_opt(&lookup, "OTEL_SERVER_PUBLIC_IP", &mut server.public_ip);

        let mut export = ExportConfig::default();
        load_env_var(&lookup, "OTEL_BATCH_SIZE", &mut export.batch_size)?;
        load_env_var(&lookup, "OTEL_INTAKE_CAPACITY", &mut export.intake_capacity)?;
        load_env_var(&lookup, "OTEL_MAX_PENDING_BATCHES", &mut export.max_pending_batches)?;
        load_env_var(&lookup, "OTEL_EXPORT_MAX_ATTEMPTS", &mut export.retry.max_attempts)?;
        load_env_var(&lookup, "OTEL_EXPORTER_OTLP_COMPRESSION", &mut export.compression)?;

        let mut flush_interval_ms = export.flush_interval.as_millis() as u64;
        let mut base_delay_ms = export.retry.base_delay.as_millis() as u64;
        let mut max_delay_ms = export.retry.max_delay.as_millis() as u64;
        let mut timeout_secs = export.timeout.as_secs();
        load_env_var(&lookup, "OTEL_FLUSH_INTERVAL_MS", &mut flush_interval_ms)?;
        load_env_var(&lookup, "OTEL_EXPORT_BASE_DELAY_MS", &mut base_delay_ms)?;
        load_env_var(&lookup, "OTEL_EXPORT_MAX_DELAY_MS", &mut max_delay_ms)?;
        load_env_var(&lookup, "OTEL_EXPORT_TIMEOUT_SECS", &mut timeout_secs)?;
        export.set_timings(flush_interval_ms, base_delay_ms, max_delay_ms, timeout_secs);

        let mut watch = WatchConfig::default();
        let mut poll_ms = watch.poll_interval.as_millis() as u64;
        load_env_var(&lookup, "OTEL_WATCH_POLL_MS", &mut poll_ms)?;
        watch.set_poll_interval_ms(poll_ms);

        let mut log_level = LogLevel::Info;
        load_env_var(&lookup, "LOG_LEVEL", &mut log_level)?;

        let config = Self {
            endpoint,
            headers,
            service_name,
            service_version,
            environment,
            tenants,
            sources,
            server,
            export,
            watch,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Collector URL for one OTLP signal, e.g. `signal_url("logs")`.
    pub fn signal_url(&self, signal: &str) -> Result<Url, ConfigError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/v1/{signal}"))
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {signal} URL: {e}")))
    }

    pub fn identity_resolver(&self) -> ServiceIdentityResolver {
        ServiceIdentityResolver::new(
            self.tenants.clone(),
            self.service_name.clone(),
            self.service_version.clone(),
            self.environment.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_endpoint_is_set() {
        let config = Config::from_lookup(lookup_from(&[(ENV_ENDPOINT, "https://otel.example.com")]))
            .unwrap();
        assert_eq!(config.service_name, "frappe");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.environment, "production");
        assert!(config.headers.is_empty());
        assert!(!config.sources.is_empty());
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn missing_endpoint_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[(ENV_SERVICE_NAME, "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_ENDPOINT)));

        let err = Config::from_lookup(lookup_from(&[(ENV_ENDPOINT, "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_ENDPOINT)));
    }

    #[test]
    fn signal_urls_append_to_base_path() {
        let config = Config::from_lookup(lookup_from(&[(ENV_ENDPOINT, "https://otel.example.com/otlp/")]))
            .unwrap();
        assert_eq!(
            config.signal_url("traces").unwrap().as_str(),
            "https://otel.example.com/otlp/v1/traces"
        );
    }

    #[test]
    fn invalid_numeric_override_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            (ENV_ENDPOINT, "https://otel.example.com"),
            ("OTEL_BATCH_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
