//! Control state machine.
//!
//! One worker task owns the relay session and processes control commands,
//! session events and the retry timer strictly one at a time. Each relay
//! session runs in its own task and reports back through generation-tagged
//! events; events from a superseded generation are discarded.

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{FailureReport, RelayError};
use crate::pipe::{PipeOutcome, RelayPipe};
use crate::port::{ControlCommand, ControlPort};
use crate::settings::{BackoffPolicy, RelaySettings};
use crate::sink::{SinkConnector, StreamInfo, StreamSink};
use crate::source::{SourceConnector, StreamSource};
use crate::state::{ControlEvent, RelayState, SelectionState};
use crate::station::{Station, StationRegistry};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Handle to the spawned control worker.
pub struct RelayController {
    join_handle: JoinHandle<()>,
}

impl RelayController {
    /// Spawns the worker and returns it with the port used to drive it.
    ///
    /// The worker stops after [`ControlPort::shutdown`] or once every port
    /// clone has been dropped, tearing down any active session first.
    pub fn spawn(
        registry: StationRegistry,
        source: Arc<dyn SourceConnector>,
        sink: Arc<dyn SinkConnector>,
        settings: RelaySettings,
    ) -> (Self, ControlPort) {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SelectionState::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let port = ControlPort::new(command_tx, registry.clone(), status_rx, event_tx.clone());

        let join_handle = tokio::spawn(async move {
            info!(stations = registry.len(), "Starting relay controller");

            let mut state = ControllerState {
                registry,
                source,
                sink,
                backoff: BackoffState::new(settings.backoff),
                settings,
                generation: 0,
                session: None,
                last_error: None,
                retry: None,
                status_tx,
                event_tx,
                session_tx,
                shutdown: false,
            };

            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(command) => {
                            let command = coalesce(command, &mut command_rx);
                            state.handle_command(command).await;
                        }
                        None => {
                            debug!("Every control port dropped, shutting down");
                            state.handle_command(ControlCommand::Shutdown).await;
                        }
                    },
                    Some(event) = session_rx.recv() => {
                        state.handle_session_event(event);
                    }
                    _ = retry_elapsed(&mut state.retry) => {
                        state.retry = None;
                        state.handle_retry();
                    }
                }

                if state.shutdown {
                    break;
                }
            }

            info!("Relay controller stopped");
        });

        (Self { join_handle }, port)
    }

    pub async fn wait(self) -> Result<()> {
        if let Err(err) = self.join_handle.await {
            if err.is_cancelled() {
                warn!("Relay controller task cancelled: {err}");
                return Ok(());
            }
            return Err(anyhow!("Relay controller join error: {}", err));
        }
        Ok(())
    }
}

/// Keeps only the most recent of the queued requests.
///
/// Requests pile up while the worker is busy tearing down a session; the
/// ones in between are superseded. A shutdown is never superseded.
fn coalesce(
    first: ControlCommand,
    commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
) -> ControlCommand {
    let mut latest = first;
    while let Ok(next) = commands.try_recv() {
        if latest == ControlCommand::Shutdown {
            continue;
        }
        debug!(superseded = ?latest, by = ?next, "Dropping superseded control request");
        latest = next;
    }
    latest
}

async fn retry_elapsed(retry: &mut Option<ScheduledRetry>) {
    match retry {
        Some(retry) => retry.sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

struct ScheduledRetry {
    sleep: Pin<Box<Sleep>>,
}

#[derive(Debug)]
struct SessionEvent {
    generation: u64,
    kind: SessionEventKind,
}

#[derive(Debug)]
enum SessionEventKind {
    /// Both ends are open and bytes are flowing
    Streaming,
    Finished(PipeOutcome),
}

/// The one relay session that may exist
struct RelaySession {
    generation: u64,
    station: Station,
    state: RelayState,
    started_at: DateTime<Utc>,
    stop: CancellationToken,
    /// `None` once the session task has reported its end
    task: Option<JoinHandle<()>>,
}

struct ControllerState {
    registry: StationRegistry,
    source: Arc<dyn SourceConnector>,
    sink: Arc<dyn SinkConnector>,
    settings: RelaySettings,
    generation: u64,
    session: Option<RelaySession>,
    last_error: Option<FailureReport>,
    retry: Option<ScheduledRetry>,
    backoff: BackoffState,
    status_tx: watch::Sender<SelectionState>,
    event_tx: broadcast::Sender<ControlEvent>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown: bool,
}

impl ControllerState {
    async fn handle_command(&mut self, command: ControlCommand) {
        debug!(?command, "Control command");

        match command {
            ControlCommand::Select(station_id) => self.select(&station_id).await,
            ControlCommand::Stop => self.stop().await,
            ControlCommand::Shutdown => {
                self.stop().await;
                self.shutdown = true;
            }
        }
    }

    async fn select(&mut self, station_id: &str) {
        let station = match self.registry.lookup(station_id) {
            Ok(station) => station,
            Err(err) => {
                warn!(station = station_id, "Ignoring selection: {err}");
                let _ = self.event_tx.send(ControlEvent::Rejected {
                    station_id: station_id.to_string(),
                    error: FailureReport::from(&err),
                });
                return;
            }
        };

        if let Some(session) = &self.session {
            if session.station.id == station.id && session.state.is_active() {
                debug!(station = %station.id, state = %session.state, "Station already selected");
                return;
            }
        }

        self.cancel_retry();
        let forced = self.end_session().await;
        self.last_error = forced.as_ref().map(FailureReport::from);
        self.backoff.reset();
        self.start_session(station);
    }

    async fn stop(&mut self) {
        if self.session.is_none() {
            debug!("Stop requested while idle");
            return;
        }

        self.cancel_retry();
        // the last failure stays visible while idle
        if let Some(err) = self.end_session().await {
            self.last_error = Some(FailureReport::from(&err));
        }
        self.backoff.reset();
        info!("Relay stopped");
        self.publish();
    }

    fn start_session(&mut self, station: Station) {
        self.generation += 1;
        let generation = self.generation;
        let stop = CancellationToken::new();

        info!(generation, station = %station.id, name = %station.display_name, "Connecting relay");

        let task = tokio::spawn(run_session(SessionContext {
            generation,
            station: station.clone(),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            pipe: RelayPipe::new(self.settings.buffer_chunks),
            stop: stop.clone(),
            events: self.session_tx.clone(),
        }));

        self.session = Some(RelaySession {
            generation,
            station,
            state: RelayState::Connecting,
            started_at: Utc::now(),
            stop,
            task: Some(task),
        });
        self.publish();
    }

    /// Tears the current session down and waits until its connections are
    /// released.
    ///
    /// Returns the error to account for when the session ignored the stop
    /// request and had to be aborted. It counts as a source failure.
    async fn end_session(&mut self) -> Option<RelayError> {
        let session = self.session.as_mut()?;
        let generation = session.generation;
        let station_id = session.station.id.clone();
        let was_active = session.state.is_active();
        let task = session.task.take();
        session.stop.cancel();

        let mut forced = None;
        if let Some(mut task) = task {
            if was_active {
                session.state = RelayState::Stopping;
                self.publish();
            }

            let grace = self.settings.stop_grace;
            match timeout(grace, &mut task).await {
                Ok(_) => debug!(generation, station = %station_id, "Relay session ended"),
                Err(_) => {
                    warn!(
                        generation,
                        station = %station_id,
                        forced = true,
                        ?grace,
                        "Relay session ignored stop request, forcing close"
                    );
                    task.abort();
                    if timeout(grace, task).await.is_err() {
                        error!(generation, station = %station_id, "Aborted relay session did not unwind");
                    }
                    forced = Some(RelayError::source_read(format!(
                        "relay for {station_id} did not stop within {grace:?}"
                    )));
                }
            }
        }

        self.session = None;
        forced
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let current = self.generation;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.generation == event.generation)
        else {
            trace!(generation = event.generation, current, "Discarding stale session event");
            return;
        };

        match event.kind {
            SessionEventKind::Streaming => {
                if session.state != RelayState::Connecting {
                    return;
                }
                session.state = RelayState::Streaming;
                info!(generation = session.generation, station = %session.station.id, "Relay streaming");
                self.last_error = None;
                self.backoff.reset();
                self.publish();
            }
            SessionEventKind::Finished(outcome) => {
                let task = session.task.take();
                match outcome {
                    PipeOutcome::StoppedCleanly => {
                        debug!(generation = event.generation, "Relay session ended on its own");
                        self.session = None;
                        self.publish();
                    }
                    PipeOutcome::SourceFailed(err) | PipeOutcome::SinkFailed(err) => {
                        self.fail_session(err);
                    }
                }
                // the task sent its last event; let it finish on its own
                drop(task);
            }
        }
    }

    fn fail_session(&mut self, err: RelayError) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = RelayState::Failed;
        let generation = session.generation;
        let station_id = session.station.id.clone();
        self.last_error = Some(FailureReport::from(&err));

        if err.is_retryable() {
            let delay = self.backoff.next_delay();
            warn!(generation, station = %station_id, retry_in = ?delay, "Relay failed: {err}");
            self.schedule_retry(delay);
        } else {
            error!(generation, station = %station_id, "Relay failed, not retrying: {err}");
        }
        self.publish();
    }

    fn handle_retry(&mut self) {
        let station = match &self.session {
            Some(session) if session.state == RelayState::Failed => session.station.clone(),
            _ => return,
        };
        // a refreshed catalog may carry a new URL for the same station
        let station = self.registry.lookup(&station.id).unwrap_or(station);

        info!(station = %station.id, "Retrying relay");
        self.session = None;
        self.start_session(station);
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.retry = Some(ScheduledRetry {
            sleep: Box::pin(sleep(delay)),
        });
    }

    fn cancel_retry(&mut self) {
        if self.retry.take().is_some() {
            debug!("Pending retry abandoned");
        }
    }

    fn snapshot(&self) -> SelectionState {
        match &self.session {
            None => SelectionState::idle(self.last_error.clone()),
            Some(session) => SelectionState {
                current_station_id: Some(session.station.id.clone()),
                relay_state: session.state,
                last_error: self.last_error.clone(),
                generation: session.generation,
                started_at: Some(session.started_at),
            },
        }
    }

    /// Publishes the snapshot if it changed.
    fn publish(&mut self) {
        let snapshot = self.snapshot();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });

        if changed {
            debug!(
                state = %snapshot.relay_state,
                station = ?snapshot.current_station_id,
                generation = snapshot.generation,
                "Relay status"
            );
            let _ = self.event_tx.send(ControlEvent::Status { state: snapshot });
        }
    }
}

struct SessionContext {
    generation: u64,
    station: Station,
    source: Arc<dyn SourceConnector>,
    sink: Arc<dyn SinkConnector>,
    pipe: RelayPipe,
    stop: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
}

async fn run_session(ctx: SessionContext) {
    let SessionContext {
        generation,
        station,
        source,
        sink,
        pipe,
        stop,
        events,
    } = ctx;
    let report = |kind| {
        let _ = events.send(SessionEvent { generation, kind });
    };

    let opened = tokio::select! {
        biased;
        _ = stop.cancelled() => {
            debug!(generation, station = %station.id, "Connection attempt abandoned");
            return;
        }
        opened = open_endpoints(source.as_ref(), sink.as_ref(), &station) => opened,
    };

    match opened {
        Ok((source, sink)) => {
            report(SessionEventKind::Streaming);
            let outcome = pipe.run(source, sink, stop).await;
            report(SessionEventKind::Finished(outcome));
        }
        Err(outcome) => report(SessionEventKind::Finished(outcome)),
    }
}

/// Opens the tuner first, then the mount, so the announced content type
/// can follow the tuner's.
async fn open_endpoints(
    source: &dyn SourceConnector,
    sink: &dyn SinkConnector,
    station: &Station,
) -> std::result::Result<(Box<dyn StreamSource>, Box<dyn StreamSink>), PipeOutcome> {
    let mut input = source
        .open(station)
        .await
        .map_err(PipeOutcome::SourceFailed)?;

    let info = StreamInfo {
        name: station.display_name.clone(),
        description: String::new(),
        content_type: input.content_type().map(str::to_string),
    };

    match sink.open(&info).await {
        Ok(output) => Ok((input, output)),
        Err(err) => {
            input.close().await;
            Err(PipeOutcome::SinkFailed(err))
        }
    }
}

struct BackoffState {
    policy: BackoffPolicy,
    current: Option<Duration>,
}

impl BackoffState {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }

    fn next_delay(&mut self) -> Duration {
        let max = self.policy.max;
        let next = match self.current {
            Some(current) => {
                Duration::try_from_secs_f64(current.as_secs_f64() * self.policy.multiplier)
                    .unwrap_or(max)
                    .min(max)
            }
            None => self.policy.initial.min(max),
        };
        self.current = Some(next);
        next
    }
}
