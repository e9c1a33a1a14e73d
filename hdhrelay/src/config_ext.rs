//! Relay settings read from the `relay` and `icecast` configuration sections.
//!
//! ```rust,ignore
//! use hdhconfig::get_config;
//! use hdhrelay::RelayConfigExt;
//!
//! let config = get_config();
//! let settings = config.get_relay_settings()?;
//! let mount = config.get_icecast_mount()?;
//! ```

use crate::constants;
use crate::settings::{BackoffPolicy, IdleSettings, RelaySettings};
use crate::sink::{IcecastProtocol, MountConfig};
use anyhow::{anyhow, Result};
use hdhconfig::Config;
use std::time::Duration;

/// Extension trait giving typed access to the relay configuration
pub trait RelayConfigExt {
    /// Timeouts, buffer size and retry policy (`relay.*`)
    fn get_relay_settings(&self) -> Result<RelaySettings>;

    /// Icecast target and source credentials (`icecast.*`)
    ///
    /// The password may be stored encrypted.
    fn get_icecast_mount(&self) -> Result<MountConfig>;

    /// Listener monitor settings (`icecast.idle.*`)
    fn get_idle_settings(&self) -> Result<IdleSettings>;

    /// `{scheme}://{server}:{port}/status-json.xsl`
    fn get_icecast_status_url(&self) -> Result<String>;

    /// Station to select at startup, if any (`relay.autostart`)
    fn get_relay_autostart(&self) -> Result<Option<String>>;
}

fn secs(config: &Config, path: &[&str], default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(config.get_u64_or(path, default)?))
}

fn positive_secs(config: &Config, path: &[&str], default: u64) -> Result<Duration> {
    let value = secs(config, path, default)?;
    if value.is_zero() {
        return Err(anyhow!("{} must be greater than zero", path.join(".")));
    }
    Ok(value)
}

impl RelayConfigExt for Config {
    fn get_relay_settings(&self) -> Result<RelaySettings> {
        let multiplier = self.get_f64_or(
            &["relay", "backoff_multiplier"],
            constants::BACKOFF_MULTIPLIER,
        )?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(anyhow!(
                "relay.backoff_multiplier must be at least 1.0, got {multiplier}"
            ));
        }

        let backoff = BackoffPolicy {
            initial: positive_secs(
                self,
                &["relay", "backoff_initial_secs"],
                constants::BACKOFF_INITIAL_SECONDS,
            )?,
            max: positive_secs(
                self,
                &["relay", "backoff_max_secs"],
                constants::BACKOFF_MAX_SECONDS,
            )?,
            multiplier,
        };

        let buffer_chunks =
            self.get_u64_or(&["relay", "buffer_chunks"], constants::PIPE_BUFFER_CHUNKS as u64)?;

        Ok(RelaySettings {
            connect_timeout: positive_secs(
                self,
                &["relay", "connect_timeout_secs"],
                constants::CONNECT_TIMEOUT_SECONDS,
            )?,
            read_timeout: positive_secs(
                self,
                &["relay", "read_timeout_secs"],
                constants::READ_TIMEOUT_SECONDS,
            )?,
            write_timeout: positive_secs(
                self,
                &["relay", "write_timeout_secs"],
                constants::WRITE_TIMEOUT_SECONDS,
            )?,
            buffer_chunks: (buffer_chunks as usize).max(1),
            stop_grace: positive_secs(
                self,
                &["relay", "stop_grace_secs"],
                constants::STOP_GRACE_SECONDS,
            )?,
            backoff,
        })
    }

    fn get_icecast_mount(&self) -> Result<MountConfig> {
        let server = self.get_string_or(&["icecast", "server"], "localhost")?;
        let port = self.get_u64_or(&["icecast", "port"], 8000)?;
        let port = u16::try_from(port).map_err(|_| anyhow!("icecast.port out of range: {port}"))?;
        let mount = self.get_string_or(&["icecast", "mount"], "/radio")?;
        let username = self.get_string_or(&["icecast", "username"], "source")?;
        let password = self.get_password(&["icecast", "password"])?;
        let protocol: IcecastProtocol = self
            .get_string_or(&["icecast", "protocol"], "put")?
            .parse()
            .map_err(|e| anyhow!("icecast.protocol: {e}"))?;

        let mut config = MountConfig::new(server, port, mount)
            .credentials(username, password)
            .protocol(protocol);
        config.content_type =
            self.get_string_or(&["icecast", "content_type"], constants::DEFAULT_CONTENT_TYPE)?;
        config.public = self.get_bool_or(&["icecast", "public"], false)?;
        config.description = self.get_string_or(&["icecast", "description"], "")?;
        Ok(config)
    }

    fn get_idle_settings(&self) -> Result<IdleSettings> {
        Ok(IdleSettings {
            enabled: self.get_bool_or(&["icecast", "idle", "enabled"], false)?,
            timeout: secs(
                self,
                &["icecast", "idle", "timeout_secs"],
                constants::IDLE_TIMEOUT_SECONDS,
            )?,
            poll_interval: positive_secs(
                self,
                &["icecast", "idle", "poll_interval_secs"],
                constants::STATUS_POLL_INTERVAL_SECONDS,
            )?,
        })
    }

    fn get_icecast_status_url(&self) -> Result<String> {
        let scheme = self.get_string_or(&["icecast", "scheme"], "http")?;
        let server = self.get_string_or(&["icecast", "server"], "localhost")?;
        let port = self.get_u64_or(&["icecast", "port"], 8000)?;
        Ok(format!("{scheme}://{server}:{port}/status-json.xsl"))
    }

    fn get_relay_autostart(&self) -> Result<Option<String>> {
        let station = self.get_string_or(&["relay", "autostart"], "")?;
        let station = station.trim();
        Ok((!station.is_empty()).then(|| station.to_string()))
    }
}
