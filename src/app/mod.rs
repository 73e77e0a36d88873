pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Cli, Config, ConfigError, LogLevel};
pub use logging_system::{LoggingError, setup_logging};

use crate::buffer::{BatchExporter, ExportStatsSnapshot, ExporterHandle};
use crate::collector::metadata::ServerMetadata;
use crate::collector::watcher::WatchContext;
use crate::collector::spawn_watchers;
use crate::instrument::Instrumentor;
use crate::sender::http::OtlpHttpTransport;
use crate::sender::otlp::OtlpSerializer;
use crate::sender::Transport;

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A running telemetry pipeline: exporter, instrumentor and log watchers.
pub struct App {
    config: Arc<Config>,
    exporter: BatchExporter,
    instrumentor: Instrumentor,
    metadata: Arc<ServerMetadata>,
    cancel: CancellationToken,
}

impl App {
    /// Builds the OTLP/HTTP transport and starts the exporter tasks.
    pub fn start(config: Config) -> Result<Self, BoxError> {
        let metadata = ServerMetadata::detect(&config.server, &config.environment);
        let serializer = OtlpSerializer::new(
            metadata.host_name.clone(),
            config.identity_resolver().default_identity(),
        );
        let transport = OtlpHttpTransport::new(&config, serializer)?;
        Ok(Self::with_transport(config, metadata, transport))
    }

    /// Same as [`App::start`] with a caller-supplied transport.
    pub fn with_transport<T>(config: Config, metadata: ServerMetadata, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        let exporter = BatchExporter::spawn(&config.export, transport);
        let instrumentor = Instrumentor::new(config.identity_resolver(), exporter.handle());
        Self {
            config: Arc::new(config),
            exporter,
            instrumentor,
            metadata: Arc::new(metadata),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cloneable entry point for wrapping HTTP services and jobs.
    pub fn instrumentor(&self) -> Instrumentor {
        self.instrumentor.clone()
    }

    pub fn exporter_handle(&self) -> ExporterHandle {
        self.exporter.handle()
    }

    /// Cancelling this token stops [`App::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tails every configured source until shutdown, then stops the watchers
    /// and flushes the exporter.
    pub async fn run(self) -> Result<ExportStatsSnapshot, BoxError> {
        let ctx = WatchContext {
            metadata: self.metadata.clone(),
            base_identity: self.config.identity_resolver().default_identity(),
            exporter: self.exporter.handle(),
            config: self.config.watch.clone(),
            submit_timeout: self.config.export.submit_timeout,
        };
        let watchers = spawn_watchers(&self.config.sources, &ctx, &self.cancel);
        let signals = shutdown::spawn_signal_listener(self.cancel.clone());

        info!(
            "frappe-otel v{} running: endpoint={}, service={}, sources={}",
            crate::VERSION,
            self.config.endpoint,
            self.config.service_name,
            self.config.sources.len()
        );

        self.cancel.cancelled().await;

        for watcher in watchers {
            match watcher.await {
                Ok(state) => info!(
                    path = %state.path.display(),
                    offset = state.offset,
                    "watcher stopped"
                ),
                Err(e) => warn!("watcher task ended abnormally: {e}"),
            }
        }
        signals.abort();

        let stats = self.exporter.shutdown().await;
        info!("frappe-otel stopped");
        Ok(stats)
    }
}

fn print_summary(config: &Config) {
    println!("endpoint:     {}", config.endpoint);
    println!("service:      {} {}", config.service_name, config.service_version);
    println!("environment:  {}", config.environment);
    println!("headers:      {}", config.headers.keys().cloned().collect::<Vec<_>>().join(", "));
    println!("tenant sites: {}", config.tenants.len());
    for source in &config.sources {
        println!("source:       {} [{}]", source.path.display(), source.tag);
    }
}

// Main entry point for the application
pub async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let registry_override = cli
        .registry_file
        .as_ref()
        .map(|path| path.display().to_string());

    let config = match Config::from_lookup(|name| match (name, &registry_override) {
        ("OTEL_REGISTRY_FILE", Some(path)) => Some(path.clone()),
        _ => std::env::var(name).ok(),
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return Err(e.into());
        }
    };

    if cli.check {
        print_summary(&config);
        return Ok(());
    }

    let level = cli.log_level.unwrap_or(config.log_level);
    let json = cli.json_logs || logging_system::json_requested();
    let app = App::start(config)?;
    setup_logging(level, json, Some(app.exporter_handle()))?;

    let stats = app.run().await?;
    if stats.batches_dropped() > 0 || stats.items_dropped_intake > 0 {
        warn!(
            batches_dropped = stats.batches_dropped(),
            items_dropped_intake = stats.items_dropped_intake,
            "telemetry was dropped during this run"
        );
    }
    Ok(())
}
