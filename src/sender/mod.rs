pub mod http;
pub mod otlp;

pub use http::OtlpHttpTransport;
pub use otlp::{EncodedBatch, OtlpSerializer};

use crate::buffer::ExportBatch;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Export timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl ExportError {
    /// Client errors other than 408/429 will fail the same way on every
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Rejected { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            ExportError::InvalidConfiguration(_) | ExportError::Serialization(_) => false,
            _ => true,
        }
    }
}

/// Delivers sealed batches to a collector.
///
/// Called only from the exporter's delivery task; implementations must not
/// block indefinitely (the exporter also bounds each call with its timeout).
pub trait Transport: Send + Sync {
    fn deliver(&self, batch: &ExportBatch) -> impl Future<Output = Result<(), ExportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn deliver(&self, batch: &ExportBatch) -> impl Future<Output = Result<(), ExportError>> + Send {
        (**self).deliver(batch)
    }
}
