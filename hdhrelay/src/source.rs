//! Tuner side of a relay: an HTTP GET on a channel URL.

use crate::constants::DEFAULT_USER_AGENT;
use crate::error::{RelayError, Result};
use crate::settings::RelaySettings;
use crate::station::Station;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Opens tuner streams.
///
/// Implementations hold no retry logic; a failed open is reported as is.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(&self, station: &Station) -> Result<Box<dyn StreamSource>>;
}

/// An open tuner stream.
#[async_trait]
pub trait StreamSource: Send {
    /// Next chunk of bytes, `Ok(None)` at end of stream.
    ///
    /// Fails with [`RelayError::SourceRead`] on reset or when no bytes
    /// arrive within the stall window.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// MIME type announced by the tuner, if any
    fn content_type(&self) -> Option<&str>;

    /// Releases the connection. Idempotent, safe after a failed read.
    async fn close(&mut self);
}

/// reqwest based [`SourceConnector`] for HDHomeRun channel URLs
#[derive(Debug, Clone)]
pub struct TunerSourceClient {
    client: reqwest::Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TunerSourceClient {
    pub fn new(settings: &RelaySettings) -> Result<Self> {
        // No overall request timeout: a live channel never ends.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| RelayError::connect(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, settings))
    }

    /// Uses a caller-provided client (proxies, custom TLS...)
    pub fn with_client(client: reqwest::Client, settings: &RelaySettings) -> Self {
        Self {
            client,
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
        }
    }
}

#[async_trait]
impl SourceConnector for TunerSourceClient {
    async fn open(&self, station: &Station) -> Result<Box<dyn StreamSource>> {
        let url = station.source_url.as_str();
        debug!(station = %station.id, url, "Opening tuner stream");

        let response = timeout(self.connect_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                RelayError::connect(format!(
                    "no response from {url} within {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| RelayError::connect(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // 503 is how an HDHomeRun says all tuners are in use
            return Err(RelayError::connect(format!("tuner returned {status} for {url}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Box::new(TunerStream {
            url: url.to_string(),
            content_type,
            read_timeout: self.read_timeout,
            stream: Some(response.bytes_stream().boxed()),
        }))
    }
}

/// Body of an open tuner response
pub struct TunerStream {
    url: String,
    content_type: Option<String>,
    read_timeout: Duration,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
}

#[async_trait]
impl StreamSource for TunerStream {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RelayError::source_read(format!("{} is closed", self.url)))?;

        loop {
            match timeout(self.read_timeout, stream.next()).await {
                Err(_) => {
                    return Err(RelayError::source_read(format!(
                        "no data from {} for {:?}",
                        self.url, self.read_timeout
                    )))
                }
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => {
                    return Err(RelayError::source_read(format!("{}: {e}", self.url)))
                }
                Ok(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Ok(Some(Ok(chunk))) => {
                    trace!(bytes = chunk.len(), "tuner chunk");
                    return Ok(Some(chunk));
                }
            }
        }
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(url = %self.url, "Tuner stream closed");
        }
    }
}
