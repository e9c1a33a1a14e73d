//! Tuner settings read from the `tuner` configuration section.

use crate::catalog::CatalogSettings;
use crate::client::HdHomeRunClient;
use anyhow::{anyhow, Result};
use hdhconfig::Config;
use std::time::Duration;

/// Extension trait giving typed access to the tuner configuration
///
/// ```rust,ignore
/// use hdhconfig::get_config;
/// use hdhtuner::TunerConfigExt;
///
/// let config = get_config();
/// let client = config.get_tuner_client()?;
/// let catalog = config.get_catalog_settings()?;
/// ```
pub trait TunerConfigExt {
    /// `{scheme}://{server}:{port}` of the tuner
    fn get_tuner_base_url(&self) -> Result<String>;

    /// Guide numbers to expose, empty for every radio channel
    fn get_tuner_channels(&self) -> Result<Vec<String>>;

    fn get_catalog_settings(&self) -> Result<CatalogSettings>;

    /// A client for the configured tuner
    fn get_tuner_client(&self) -> Result<HdHomeRunClient>;
}

impl TunerConfigExt for Config {
    fn get_tuner_base_url(&self) -> Result<String> {
        let scheme = self.get_string_or(&["tuner", "scheme"], "http")?;
        let server = self.get_string_or(&["tuner", "server"], "hdhomerun.local")?;
        let port = self.get_u64_or(&["tuner", "port"], 80)?;
        Ok(format!("{scheme}://{server}:{port}"))
    }

    fn get_tuner_channels(&self) -> Result<Vec<String>> {
        self.get_string_list(&["tuner", "channels"])
    }

    fn get_catalog_settings(&self) -> Result<CatalogSettings> {
        let defaults = CatalogSettings::default();
        let interval = self.get_u64_or(
            &["tuner", "refresh_interval_secs"],
            defaults.refresh_interval.as_secs(),
        )?;
        let retry = self.get_u64_or(
            &["tuner", "refresh_retry_secs"],
            defaults.refresh_retry.as_secs(),
        )?;
        if interval == 0 || retry == 0 {
            return Err(anyhow!("tuner refresh intervals must be greater than zero"));
        }

        Ok(CatalogSettings {
            channels: self.get_tuner_channels()?,
            refresh_interval: Duration::from_secs(interval),
            refresh_retry: Duration::from_secs(retry),
        })
    }

    fn get_tuner_client(&self) -> Result<HdHomeRunClient> {
        let timeout = self.get_u64_or(
            &["tuner", "request_timeout_secs"],
            crate::client::DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let client = HdHomeRunClient::builder()
            .base_url(self.get_tuner_base_url()?)
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;
        Ok(client)
    }
}
