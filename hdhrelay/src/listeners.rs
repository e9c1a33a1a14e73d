//! Listener count of the relay mount, and idle auto-stop.

use crate::port::ControlPort;
use crate::settings::IdleSettings;
use crate::state::RelayState;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads `/status-json.xsl` from the Icecast server
#[derive(Debug, Clone)]
pub struct IcecastStatusClient {
    client: reqwest::Client,
    status_url: String,
    mount: String,
}

impl IcecastStatusClient {
    pub fn new(status_url: impl Into<String>, mount: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("cannot build Icecast status client")?;
        Ok(Self {
            client,
            status_url: status_url.into(),
            mount: mount.into(),
        })
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Current listener count of the mount, 0 when the mount is not live.
    pub async fn listeners(&self) -> Result<u32> {
        let response = self
            .client
            .get(&self.status_url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.status_url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} returned {}", self.status_url, status));
        }

        let doc: Value = response
            .json()
            .await
            .with_context(|| format!("invalid status document from {}", self.status_url))?;
        Ok(listeners_for_mount(&doc, &self.mount))
    }
}

/// Extracts the listener count of `mount` from an Icecast status document.
///
/// `icestats.source` is absent when nothing is streaming, an object with a
/// single source and an array otherwise.
pub fn listeners_for_mount(doc: &Value, mount: &str) -> u32 {
    let mount = mount.to_ascii_lowercase();
    let sources: Vec<&Value> = match doc.pointer("/icestats/source") {
        Some(Value::Array(sources)) => sources.iter().collect(),
        Some(source @ Value::Object(_)) => vec![source],
        _ => return 0,
    };

    sources
        .into_iter()
        .find(|source| {
            source
                .get("listenurl")
                .and_then(Value::as_str)
                .is_some_and(|url| url.to_ascii_lowercase().ends_with(&mount))
        })
        .and_then(|source| source.get("listeners"))
        .and_then(|count| match count {
            Value::Number(n) => n.as_u64(),
            // some builds report counters as strings
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .map(|count| count.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Background poller of the mount's listener count
pub struct IdleMonitor {
    join_handle: JoinHandle<()>,
    cancel: CancellationToken,
    listeners: watch::Receiver<Option<u32>>,
}

impl IdleMonitor {
    pub fn spawn(client: IcecastStatusClient, port: ControlPort, settings: IdleSettings) -> Self {
        let (listeners_tx, listeners) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join_handle = tokio::spawn(async move {
            info!(
                url = client.status_url(),
                mount = client.mount(),
                idle_stop = settings.enabled,
                "Starting listener monitor"
            );

            let mut ticker = interval(settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut idle = IdleTracker::new(settings.timeout);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let polled = tokio::select! {
                    _ = token.cancelled() => break,
                    polled = client.listeners() => polled,
                };
                let count = match polled {
                    Ok(count) => count,
                    Err(err) => {
                        warn!("Listener poll failed: {err:#}");
                        continue;
                    }
                };
                listeners_tx.send_if_modified(|current| {
                    let changed = *current != Some(count);
                    *current = Some(count);
                    changed
                });

                let status = port.snapshot();
                let streaming = status.relay_state == RelayState::Streaming;
                if idle.observe(status.generation, streaming, count, Instant::now())
                    && settings.enabled
                {
                    info!(
                        station = ?status.current_station_id,
                        idle_for = ?settings.timeout,
                        "No listeners, stopping relay"
                    );
                    if port.stop().is_err() {
                        debug!("Relay controller gone, listener monitor exiting");
                        break;
                    }
                    idle.clear();
                }
            }

            debug!("Listener monitor stopped");
        });

        Self {
            join_handle,
            cancel,
            listeners,
        }
    }

    /// Last polled count, `None` before the first successful poll
    pub fn current(&self) -> Option<u32> {
        *self.listeners.borrow()
    }

    pub fn listeners(&self) -> watch::Receiver<Option<u32>> {
        self.listeners.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join_handle.await {
            warn!("Listener monitor join error: {err}");
        }
    }
}

/// Tracks how long the current session has been streaming to nobody.
#[derive(Debug)]
struct IdleTracker {
    timeout: Duration,
    since: Option<(u64, Instant)>,
}

impl IdleTracker {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            since: None,
        }
    }

    /// Records one poll; true once the session has had no listeners for
    /// the whole timeout.
    fn observe(&mut self, generation: u64, streaming: bool, listeners: u32, now: Instant) -> bool {
        if !streaming || listeners > 0 {
            self.since = None;
            return false;
        }

        match self.since {
            Some((seen, since)) if seen == generation => now.duration_since(since) >= self.timeout,
            _ => {
                self.since = Some((generation, now));
                self.timeout.is_zero()
            }
        }
    }

    fn clear(&mut self) {
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listeners_single_source() {
        let doc = json!({
            "icestats": {
                "source": {"listenurl": "http://radio.local:8000/Radio", "listeners": 3}
            }
        });
        assert_eq!(listeners_for_mount(&doc, "/radio"), 3);
    }

    #[test]
    fn test_listeners_source_array() {
        let doc = json!({
            "icestats": {
                "source": [
                    {"listenurl": "http://radio.local:8000/other", "listeners": 9},
                    {"listenurl": "http://radio.local:8000/radio", "listeners": "2"}
                ]
            }
        });
        assert_eq!(listeners_for_mount(&doc, "/radio"), 2);
        assert_eq!(listeners_for_mount(&doc, "/missing"), 0);
    }

    #[test]
    fn test_listeners_no_source() {
        let doc = json!({"icestats": {"admin": "icemaster@localhost"}});
        assert_eq!(listeners_for_mount(&doc, "/radio"), 0);
    }

    #[test]
    fn test_idle_tracker() {
        let start = Instant::now();
        let at = |secs| start + Duration::from_secs(secs);
        let mut idle = IdleTracker::new(Duration::from_secs(60));

        assert!(!idle.observe(1, true, 0, at(0)));
        assert!(!idle.observe(1, true, 0, at(30)));
        assert!(idle.observe(1, true, 0, at(60)));

        // a listener resets the window
        assert!(!idle.observe(1, true, 1, at(70)));
        assert!(!idle.observe(1, true, 0, at(80)));
        assert!(!idle.observe(1, true, 0, at(130)));

        // so does a new session
        assert!(!idle.observe(2, true, 0, at(150)));
        assert!(!idle.observe(2, true, 0, at(200)));
        assert!(idle.observe(2, true, 0, at(210)));

        // not streaming never counts as idle
        assert!(!idle.observe(2, false, 0, at(400)));
    }
}
