//! HTTP client for the HDHomeRun device API
//!
//! # Example
//!
//! ```no_run
//! use hdhtuner::{radio_stations, HdHomeRunClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HdHomeRunClient::builder()
//!         .base_url("http://hdhomerun.local")
//!         .build()?;
//!
//!     let device = client.device_info().await?;
//!     println!("{} ({} tuners)", device.friendly_name, device.tuner_count);
//!
//!     for station in radio_stations(&client.lineup().await?, &[]) {
//!         println!("{} {}", station.id, station.display_name);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::models::{DeviceInfo, LineupEntry};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://hdhomerun.local";

/// Default timeout for API requests (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_USER_AGENT: &str = concat!("hdhtuner/", env!("CARGO_PKG_VERSION"));

/// Stateless client of one tuner
#[derive(Debug, Clone)]
pub struct HdHomeRunClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HdHomeRunClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Device identity, `GET /discover.json`
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        self.get_json("discover.json").await
    }

    /// Channel lineup, `GET /lineup.json`
    pub async fn lineup(&self) -> Result<Vec<LineupEntry>> {
        let lineup: Vec<LineupEntry> = self.get_json("lineup.json").await?;
        debug!(channels = lineup.len(), "Fetched tuner lineup");
        Ok(lineup)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.base_url.join(endpoint)?;
        debug!(url = %url, "Querying tuner");

        let response = self.client.get(url.clone()).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Builder for [`HdHomeRunClient`]
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    /// Reuse an existing HTTP client (shared pool, proxy...)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// `scheme://host[:port]` of the tuner
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<HdHomeRunClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        // joins must stay below the configured prefix
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(HdHomeRunClient {
            client,
            base_url: Url::parse(&base)?,
            timeout: self.timeout,
        })
    }
}
