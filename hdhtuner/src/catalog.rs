//! Periodic refresh of the station registry from the tuner lineup.

use crate::client::HdHomeRunClient;
use crate::error::{Error, Result};
use crate::models::radio_stations;
use hdhrelay::{ControlPort, StationRegistry};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_REFRESH_RETRY_SECS: u64 = 60;

/// Refresh cadence and channel filter
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    /// Guide numbers to expose; empty exposes every radio channel
    pub channels: Vec<String>,
    pub refresh_interval: Duration,
    /// Delay before the next attempt after a failed refresh
    pub refresh_retry: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            refresh_retry: Duration::from_secs(DEFAULT_REFRESH_RETRY_SECS),
        }
    }
}

enum CatalogCommand {
    /// Refresh now; the reply carries the station count
    Refresh(oneshot::Sender<Result<usize>>),
    Shutdown,
}

/// Background task keeping a [`StationRegistry`] in sync with the tuner.
///
/// The station set is replaced as a whole, so the relay keeps whatever it
/// is streaming; only later selections see the new catalog.
pub struct CatalogWorker {
    cmd_tx: mpsc::UnboundedSender<CatalogCommand>,
    /// Station count of the last successful refresh
    loaded: watch::Receiver<Option<usize>>,
    join_handle: JoinHandle<()>,
}

impl CatalogWorker {
    pub fn spawn(
        client: HdHomeRunClient,
        registry: StationRegistry,
        settings: CatalogSettings,
    ) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded) = watch::channel(None);

        let join_handle = tokio::spawn(async move {
            info!(
                tuner = %client.base_url(),
                channels = ?settings.channels,
                "Starting catalog worker"
            );

            let next_delay = |result: &Result<usize>| match result {
                Ok(count) => {
                    loaded_tx.send_replace(Some(*count));
                    settings.refresh_interval
                }
                Err(err) => {
                    warn!(retry_in = ?settings.refresh_retry, "Lineup refresh failed: {err}");
                    settings.refresh_retry
                }
            };

            let mut delay = next_delay(&refresh(&client, &registry, &settings.channels).await);

            loop {
                tokio::select! {
                    _ = sleep(delay) => {
                        delay = next_delay(&refresh(&client, &registry, &settings.channels).await);
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(CatalogCommand::Refresh(reply)) => {
                            let result = refresh(&client, &registry, &settings.channels).await;
                            delay = next_delay(&result);
                            let _ = reply.send(result);
                        }
                        Some(CatalogCommand::Shutdown) | None => break,
                    }
                }
            }

            info!("Catalog worker stopped");
        });

        Self {
            cmd_tx,
            loaded,
            join_handle,
        }
    }

    /// Refreshes the catalog now and returns the number of stations.
    pub async fn refresh(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CatalogCommand::Refresh(tx))
            .map_err(|_| Error::WorkerStopped)?;
        rx.await.map_err(|_| Error::WorkerStopped)?
    }

    /// Waits for the first successful refresh and returns its station count.
    pub async fn wait_ready(&self) -> Result<usize> {
        let mut loaded = self.loaded.clone();
        let count = loaded
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::WorkerStopped)?;
        Ok((*count).unwrap_or_default())
    }

    /// Selects `station` on `port` as soon as the first catalog is loaded.
    ///
    /// The selection waits in the background for as long as the tuner takes
    /// to answer, so a slow boot does not lose it.
    pub fn select_when_ready(&self, port: ControlPort, station: String) -> JoinHandle<()> {
        let mut loaded = self.loaded.clone();
        tokio::spawn(async move {
            let ready = loaded.wait_for(Option::is_some).await.is_ok();
            if !ready {
                warn!(station = %station, "Catalog worker stopped before loading, autostart dropped");
                return;
            }
            match port.select(&station) {
                Ok(selected) => info!(station = %selected.id, "Autostart: {}", selected.display_name),
                Err(err) => warn!(station = %station, "Autostart skipped: {err}"),
            }
        })
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(CatalogCommand::Shutdown);
        if let Err(err) = self.join_handle.await {
            warn!("Catalog worker join error: {err}");
        }
    }
}

/// Fetches the lineup once and replaces the registry content.
///
/// Returns the number of stations now in the registry.
pub async fn refresh(
    client: &HdHomeRunClient,
    registry: &StationRegistry,
    channels: &[String],
) -> Result<usize> {
    let lineup = client.lineup().await?;
    let stations = radio_stations(&lineup, channels);
    let count = stations.len();

    if registry.replace(stations) {
        info!(stations = count, lineup = lineup.len(), "Station catalog updated");
    } else {
        debug!(stations = count, "Station catalog unchanged");
    }
    Ok(count)
}
