//! Control port: the only way to drive the relay.
//!
//! Requests are validated against the station registry before they are
//! queued, so an unknown station is refused right away and never reaches
//! the controller. Accepted requests complete asynchronously; callers
//! observe the outcome through [`ControlPort::watch`] or
//! [`ControlPort::subscribe`].

use crate::error::{FailureReport, RelayError, Result};
use crate::state::{ControlEvent, SelectionState};
use crate::station::{Station, StationRegistry};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlCommand {
    Select(String),
    Stop,
    Shutdown,
}

/// Cloneable handle to a running [`crate::RelayController`]
#[derive(Clone)]
pub struct ControlPort {
    commands: mpsc::UnboundedSender<ControlCommand>,
    registry: StationRegistry,
    status: watch::Receiver<SelectionState>,
    events: broadcast::Sender<ControlEvent>,
}

impl ControlPort {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<ControlCommand>,
        registry: StationRegistry,
        status: watch::Receiver<SelectionState>,
        events: broadcast::Sender<ControlEvent>,
    ) -> Self {
        Self {
            commands,
            registry,
            status,
            events,
        }
    }

    /// Requests a switch to `station_id`.
    ///
    /// Returns the resolved station once the request is queued. A later
    /// request supersedes this one if it arrives before the switch begins.
    pub fn select(&self, station_id: &str) -> Result<Station> {
        let station = match self.registry.lookup(station_id) {
            Ok(station) => station,
            Err(err) => {
                debug!(station = station_id, "Selection refused: {err}");
                let _ = self.events.send(ControlEvent::Rejected {
                    station_id: station_id.to_string(),
                    error: FailureReport::from(&err),
                });
                return Err(err);
            }
        };

        self.send(ControlCommand::Select(station.id.clone()))?;
        Ok(station)
    }

    /// Requests the relay to go idle. A no-op when already idle.
    pub fn stop(&self) -> Result<()> {
        self.send(ControlCommand::Stop)
    }

    /// Stops the relay and terminates the controller.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlCommand::Shutdown)
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| RelayError::Closed)
    }

    /// Latest published status
    pub fn snapshot(&self) -> SelectionState {
        self.status.borrow().clone()
    }

    /// Status receiver that only ever holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<SelectionState> {
        self.status.clone()
    }

    /// Every status change and rejection, in order, from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    /// Waits until the published status satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SelectionState>
    where
        F: FnMut(&SelectionState) -> bool,
    {
        let mut status = self.status.clone();
        let state = status
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| RelayError::Closed)?;
        Ok(state.clone())
    }

    pub fn stations(&self) -> Vec<Station> {
        self.registry.list()
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    /// Whether the controller is still accepting requests
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
