use crate::reliability::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body compression for OTLP/HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            other => Err(format!("unsupported compression '{other}' (expected none or gzip)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Items per batch before it is sealed early.
    pub batch_size: usize,
    /// Partial batches are sealed at least this often.
    pub flush_interval: Duration,
    /// Capacity of the shared producer intake.
    pub intake_capacity: usize,
    /// Sealed batches waiting for delivery; the oldest is dropped beyond this.
    pub max_pending_batches: usize,
    /// How long a watcher waits for intake room before counting a drop.
    pub submit_timeout: Duration,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub compression: Compression,
    pub retry: RetryConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            flush_interval: Duration::from_secs(5),
            intake_capacity: 8192,
            max_pending_batches: 64,
            submit_timeout: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
            compression: Compression::None,
            retry: RetryConfig::default(),
        }
    }
}

impl ExportConfig {
    pub(super) fn set_timings(
        &mut self,
        flush_interval_ms: u64,
        base_delay_ms: u64,
        max_delay_ms: u64,
        timeout_secs: u64,
    ) {
        self.flush_interval = Duration::from_millis(flush_interval_ms);
        self.retry.base_delay = Duration::from_millis(base_delay_ms);
        self.retry.max_delay = Duration::from_millis(max_delay_ms);
        self.timeout = Duration::from_secs(timeout_secs);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// Delay before reopening after an I/O error or a missing file.
    pub reopen_backoff: Duration,
    pub max_reopen_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            reopen_backoff: Duration::from_secs(1),
            max_reopen_backoff: Duration::from_secs(30),
        }
    }
}

impl WatchConfig {
    pub(super) fn set_poll_interval_ms(&mut self, poll_ms: u64) {
        self.poll_interval = Duration::from_millis(poll_ms);
    }
}

/// Server identification overrides; unset fields are detected at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOverrides {
    pub name: Option<String>,
    pub public_ip: Option<String>,
}
