use super::otlp::OtlpSerializer;
use super::{ExportError, Transport};
use crate::app::config::{Compression, Config};
use crate::buffer::ExportBatch;

use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
const MAX_ERROR_BODY: usize = 512;

/// OTLP/HTTP protobuf transport.
#[derive(Debug, Clone)]
pub struct OtlpHttpTransport {
    client: Client,
    headers: HeaderMap,
    traces_url: Url,
    logs_url: Url,
    metrics_url: Url,
    compression: Compression,
    serializer: OtlpSerializer,
}

impl OtlpHttpTransport {
    pub fn new(config: &Config, serializer: OtlpSerializer) -> Result<Self, ExportError> {
        let signal_url = |signal: &str| {
            config
                .signal_url(signal)
                .map_err(|e| ExportError::InvalidConfiguration(e.to_string()))
        };

        let client = ClientBuilder::new()
            .timeout(config.export.timeout)
            .connect_timeout(config.export.timeout.min(Duration::from_secs(5)))
            .pool_idle_timeout(Duration::from_secs(60))
            .user_agent(format!("frappe-otel/{}", crate::VERSION))
            .build()?;

        Ok(Self {
            client,
            headers: build_headers(&config.headers, config.export.compression)?,
            traces_url: signal_url("traces")?,
            logs_url: signal_url("logs")?,
            metrics_url: signal_url("metrics")?,
            compression: config.export.compression,
            serializer,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn url_for(&self, signal: &str) -> &Url {
        match signal {
            "traces" => &self.traces_url,
            "metrics" => &self.metrics_url,
            _ => &self.logs_url,
        }
    }

    async fn post(&self, signal: &str, body: &[u8]) -> Result<(), ExportError> {
        let payload = match self.compression {
            Compression::Gzip => gzip(body)?,
            Compression::None => body.to_vec(),
        };
        let bytes_sent = payload.len();
        let start = Instant::now();

        let response = self
            .client
            .post(self.url_for(signal).clone())
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(signal, bytes_sent, latency = ?start.elapsed(), "OTLP export accepted");
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        message.truncate(MAX_ERROR_BODY);
        warn!(signal, status = status.as_u16(), "OTLP export rejected");
        Err(ExportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl Transport for OtlpHttpTransport {
    async fn deliver(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        let encoded = self.serializer.encode(batch)?;
        for (signal, body) in encoded.requests() {
            self.post(signal, body).await?;
        }
        Ok(())
    }
}

fn build_headers(
    configured: &BTreeMap<String, String>,
    compression: Compression,
) -> Result<HeaderMap, ExportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
    if compression == Compression::Gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }

    for (key, value) in configured {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ExportError::InvalidConfiguration(format!("Invalid header name {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ExportError::InvalidConfiguration(format!("Invalid header value for {key}: {e}")))?;
        if name == USER_AGENT || name == CONTENT_TYPE {
            warn!(header = %name, "overriding built-in export header");
        }
        headers.insert(name, value);
    }
    Ok(headers)
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder
        .write_all(body)
        .map_err(|e| ExportError::Serialization(format!("gzip failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ExportError::Serialization(format!("gzip failed: {e}")))
}
