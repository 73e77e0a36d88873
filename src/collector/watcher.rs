//! Tails one log file across rotation and truncation.
//!
//! ```text
//! Opening ──► Tailing ──► RotatedPendingReopen ──► Opening
//!    ▲           │
//!    └─ Error ◄──┘          (any phase) ──cancel──► Closed
//! ```

use super::line::parse_line;
use super::{LogSource, ServerMetadata, SourceError};
use crate::app::config::WatchConfig;
use crate::buffer::ExporterHandle;
use crate::domain::{LogRecord, ServiceIdentity, SourceAttributes};

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines shipped per read pass before the watcher checks rotation again.
const MAX_LINES_PER_PASS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Opening,
    Tailing,
    RotatedPendingReopen,
    Error,
    Closed,
}

/// Device and inode of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub path: PathBuf,
    pub tag: String,
    pub service: String,
    /// Byte offset just past the last complete line shipped.
    pub offset: u64,
    pub identity: Option<FileIdentity>,
    pub mtime: Option<SystemTime>,
}

/// Everything watchers share.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub metadata: Arc<ServerMetadata>,
    /// Version and environment for tailed records; name and site come from
    /// each source.
    pub base_identity: ServiceIdentity,
    pub exporter: ExporterHandle,
    pub config: WatchConfig,
    pub submit_timeout: Duration,
}

enum TailOutcome {
    Idle,
    Progress,
    Rotated,
}

pub struct SourceWatcher {
    source: LogSource,
    identity: ServiceIdentity,
    ctx: WatchContext,
    cancel: CancellationToken,
    state: WatchState,
    phase: WatchPhase,
    reader: Option<BufReader<File>>,
    /// Bytes of an unterminated trailing line.
    partial: Vec<u8>,
    start_at_end: bool,
}

impl SourceWatcher {
    pub fn new(source: LogSource, ctx: WatchContext, cancel: CancellationToken) -> Self {
        let service_name = if source.service.trim().is_empty() {
            ctx.base_identity.service_name.clone()
        } else {
            source.service.clone()
        };
        let identity = ServiceIdentity {
            tenant: source.site.clone(),
            service_name: service_name.clone(),
            ..ctx.base_identity.clone()
        };
        let state = WatchState {
            path: source.path.clone(),
            tag: source.tag.clone(),
            service: service_name,
            offset: 0,
            identity: None,
            mtime: None,
        };

        Self {
            source,
            identity,
            ctx,
            cancel,
            state,
            phase: WatchPhase::Opening,
            reader: None,
            partial: Vec::new(),
            start_at_end: true,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Runs until cancelled and returns the final state.
    pub async fn run(mut self) -> WatchState {
        let mut backoff = self.ctx.config.reopen_backoff;
        debug!(path = %self.state.path.display(), tag = %self.state.tag, "watcher started");

        while self.phase != WatchPhase::Closed {
            if self.cancel.is_cancelled() {
                self.phase = WatchPhase::Closed;
                break;
            }

            self.phase = match self.phase {
                WatchPhase::Opening => match self.open().await {
                    Ok(()) => {
                        backoff = self.ctx.config.reopen_backoff;
                        WatchPhase::Tailing
                    }
                    Err(e) => self.fail(&e),
                },
                WatchPhase::Tailing => match self.tail().await {
                    Ok(TailOutcome::Progress) => WatchPhase::Tailing,
                    Ok(TailOutcome::Idle) => {
                        if self.pause(self.ctx.config.poll_interval).await {
                            WatchPhase::Tailing
                        } else {
                            WatchPhase::Closed
                        }
                    }
                    Ok(TailOutcome::Rotated) => WatchPhase::RotatedPendingReopen,
                    Err(e) => self.fail(&e),
                },
                WatchPhase::RotatedPendingReopen => {
                    info!(path = %self.state.path.display(), offset = self.state.offset, "log file rotated, reopening");
                    self.close_handle();
                    self.start_at_end = false;
                    WatchPhase::Opening
                }
                WatchPhase::Error => {
                    self.close_handle();
                    if self.pause(backoff).await {
                        backoff = (backoff * 2).min(self.ctx.config.max_reopen_backoff);
                        WatchPhase::Opening
                    } else {
                        WatchPhase::Closed
                    }
                }
                WatchPhase::Closed => WatchPhase::Closed,
            };
        }

        self.close_handle();
        debug!(path = %self.state.path.display(), offset = self.state.offset, "watcher closed");
        self.state
    }

    fn fail(&mut self, error: &SourceError) -> WatchPhase {
        match error {
            // A file that does not exist yet is read from its start once it appears.
            SourceError::Missing(_) => {
                debug!(%error, "log source unavailable");
                self.start_at_end = false;
            }
            _ => warn!(%error, "log source error, retrying after backoff"),
        }
        WatchPhase::Error
    }

    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(duration) => true,
        }
    }

    fn close_handle(&mut self) {
        self.reader = None;
        if !self.partial.is_empty() {
            debug!(bytes = self.partial.len(), "discarding unterminated line");
            self.partial.clear();
        }
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let path = self.source.path.clone();
        let mut file = File::open(&path)
            .await
            .map_err(|e| SourceError::from_io(&path, e))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| SourceError::from_io(&path, e))?;

        let identity = FileIdentity::of(&meta);
        let start = self.resume_offset(identity, meta.len());
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| SourceError::from_io(&path, e))?;

        self.state.offset = start;
        self.state.identity = Some(identity);
        self.state.mtime = meta.modified().ok();
        self.reader = Some(BufReader::new(file));
        self.partial.clear();
        self.start_at_end = false;
        debug!(path = %path.display(), offset = start, "opened log source");
        Ok(())
    }

    /// Where reading starts on `open`. The same file picks up after the last
    /// shipped line; only a new identity or a truncation starts over at 0.
    fn resume_offset(&self, identity: FileIdentity, len: u64) -> u64 {
        if self.start_at_end {
            return len;
        }
        if self.state.identity != Some(identity) {
            return 0;
        }
        if len < self.state.offset {
            let error = SourceError::Truncated {
                path: self.source.path.clone(),
                offset: self.state.offset,
                len,
            };
            warn!(%error, "log source truncated while closed, restarting from the beginning");
            return 0;
        }
        self.state.offset
    }

    async fn tail(&mut self) -> Result<TailOutcome, SourceError> {
        let shipped = self.read_lines().await?;
        if shipped >= MAX_LINES_PER_PASS {
            return Ok(TailOutcome::Progress);
        }

        let meta = match tokio::fs::metadata(&self.source.path).await {
            Ok(meta) => meta,
            // Renamed away or deleted: keep the open handle until a file with
            // another identity takes the path.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(if shipped > 0 {
                    TailOutcome::Progress
                } else {
                    TailOutcome::Idle
                });
            }
            Err(e) => return Err(SourceError::from_io(&self.source.path, e)),
        };

        if self.state.identity != Some(FileIdentity::of(&meta)) {
            self.drain().await?;
            return Ok(TailOutcome::Rotated);
        }

        let position = self.state.offset + self.partial.len() as u64;
        if meta.len() < position {
            let error = SourceError::Truncated {
                path: self.source.path.clone(),
                offset: position,
                len: meta.len(),
            };
            warn!(%error, "log source truncated, restarting from the beginning");
            self.rewind().await?;
            return Ok(TailOutcome::Progress);
        }

        self.state.mtime = meta.modified().ok();
        Ok(if shipped > 0 {
            TailOutcome::Progress
        } else {
            TailOutcome::Idle
        })
    }

    /// Ships every remaining complete line of the current handle.
    async fn drain(&mut self) -> Result<(), SourceError> {
        while self.read_lines().await? >= MAX_LINES_PER_PASS {}
        Ok(())
    }

    async fn rewind(&mut self) -> Result<(), SourceError> {
        if let Some(reader) = self.reader.as_mut() {
            reader
                .seek(SeekFrom::Start(0))
                .await
                .map_err(|e| SourceError::from_io(&self.source.path, e))?;
        }
        self.partial.clear();
        self.state.offset = 0;
        Ok(())
    }

    /// Reads complete lines from the current position and ships them.
    /// A trailing partial line stays buffered until its newline arrives.
    async fn read_lines(&mut self) -> Result<usize, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };

        let mut lines = Vec::new();
        while lines.len() < MAX_LINES_PER_PASS {
            let read = reader
                .read_until(b'\n', &mut self.partial)
                .await
                .map_err(|e| SourceError::from_io(&self.source.path, e))?;
            if read == 0 || !self.partial.ends_with(b"\n") {
                break;
            }
            let raw = std::mem::take(&mut self.partial);
            let line_offset = self.state.offset;
            self.state.offset += raw.len() as u64;
            lines.push((line_offset, raw));
        }

        let count = lines.len();
        for (offset, raw) in lines {
            self.ship(offset, &raw).await;
        }
        Ok(count)
    }

    async fn ship(&self, offset: u64, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return;
        }

        let parsed = parse_line(line);
        let mut source = SourceAttributes {
            file_path: Some(self.source.path.display().to_string()),
            tag: self.source.tag.clone(),
            fields: parsed.fields,
        };
        self.ctx.metadata.apply(&mut source.fields);
        source
            .fields
            .insert("service.name".to_string(), self.identity.service_name.clone());
        source.fields.insert("log.offset".to_string(), offset.to_string());

        let mut record = LogRecord::new(parsed.severity, parsed.message, source);
        record.identity = Some(self.identity.clone());

        if let Err(e) = self.ctx.exporter.submit(record, self.ctx.submit_timeout).await {
            debug!(path = %self.source.path.display(), offset, error = %e, "dropped tailed line");
        }
    }
}
