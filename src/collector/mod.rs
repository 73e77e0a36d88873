pub mod line;
pub mod metadata;
pub mod watcher;

pub use line::{ParsedLine, parse_line};
pub use metadata::ServerMetadata;
pub use watcher::{FileIdentity, SourceWatcher, WatchContext, WatchPhase, WatchState};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Log source not found: {0}")]
    Missing(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} truncated to {len} bytes below offset {offset}")]
    Truncated { path: PathBuf, offset: u64, len: u64 },
}

impl SourceError {
    pub(crate) fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            SourceError::Missing(path.to_path_buf())
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// One tailed log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSource {
    pub path: PathBuf,
    pub tag: String,
    /// Service name records from this file are attributed to.
    pub service: String,
    /// Site the file belongs to, when it is tenant specific.
    #[serde(default)]
    pub site: Option<String>,
}

impl LogSource {
    pub fn new(path: impl Into<PathBuf>, tag: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
            service: service.into(),
            site: None,
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// Web, worker, scheduler and framework logs of a bench, plus their
    /// `.error.log` twins.
    pub fn frappe_bench_defaults(bench_root: &str) -> Vec<Self> {
        let logs = Path::new(bench_root).join("logs");
        [
            ("web", "frappe-web"),
            ("worker", "frappe-worker"),
            ("schedule", "frappe-schedule"),
            ("frappe", "frappe"),
        ]
        .into_iter()
        .flat_map(|(name, service)| {
            [
                Self::new(logs.join(format!("{name}.log")), format!("frappe.{name}"), service),
                Self::new(
                    logs.join(format!("{name}.error.log")),
                    format!("frappe.{name}.error"),
                    service,
                ),
            ]
        })
        .collect()
    }
}

/// Starts one watcher task per source.
pub fn spawn_watchers(
    sources: &[LogSource],
    ctx: &WatchContext,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<WatchState>> {
    info!(count = sources.len(), "starting log source watchers");
    sources
        .iter()
        .map(|source| {
            let watcher = SourceWatcher::new(source.clone(), ctx.clone(), cancel.child_token());
            tokio::spawn(watcher.run())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_defaults_cover_all_process_logs() {
        let sources = LogSource::frappe_bench_defaults("/home/frappe/frappe-bench");
        assert_eq!(sources.len(), 8);
        assert_eq!(
            sources[0].path,
            PathBuf::from("/home/frappe/frappe-bench/logs/web.log")
        );
        assert_eq!(sources[0].tag, "frappe.web");
        assert_eq!(sources[1].tag, "frappe.web.error");
        assert!(
            sources
                .iter()
                .any(|s| s.path.ends_with("logs/schedule.error.log") && s.service == "frappe-schedule")
        );
    }

    #[test]
    fn missing_file_maps_to_missing() {
        let err = SourceError::from_io(
            Path::new("/nope"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, SourceError::Missing(_)));
    }
}
