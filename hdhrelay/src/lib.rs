//! # hdhrelay - HDHomeRun to Icecast relay
//!
//! `hdhrelay` copies the live stream of one HDHomeRun radio channel to one
//! Icecast mount. At most one station is relayed at any time; switching
//! stations tears the current relay down completely before the next one
//! connects.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hdhrelay::{
//!     IcecastSinkClient, MountConfig, RelayController, RelaySettings, Station,
//!     StationRegistry, TunerSourceClient,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = RelaySettings::default();
//!     let registry = StationRegistry::with_stations(vec![Station::new(
//!         "101.1",
//!         "KXYZ",
//!         "http://hdhomerun.local:5004/auto/v101.1",
//!     )]);
//!
//!     let mount = MountConfig::new("localhost", 8000, "/radio").credentials("source", "hackme");
//!     let source = Arc::new(TunerSourceClient::new(&settings)?);
//!     let sink = Arc::new(IcecastSinkClient::new(mount, &settings));
//!
//!     let (controller, port) = RelayController::spawn(registry, source, sink, settings);
//!
//!     port.select("101.1")?;
//!     let status = port
//!         .wait_for(|s| s.relay_state == hdhrelay::RelayState::Streaming)
//!         .await?;
//!     println!("relaying {:?}", status.current_station_id);
//!
//!     port.shutdown()?;
//!     controller.wait().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`source`]: tuner side, an HTTP GET on the channel URL
//! - [`sink`]: Icecast side, a raw source connection on the mount
//! - [`pipe`]: bounded byte pump between one source and one sink
//! - [`controller`]: the state machine owning the one relay session
//! - [`port`]: the handle used to send requests and observe status
//! - [`listeners`]: listener count polling and idle auto-stop
//!
//! Every transition is published as a [`SelectionState`] on a `watch`
//! channel and as a [`ControlEvent`] on a broadcast channel.
//!
//! ## Features
//!
//! - `hdhconfig` (default): [`RelayConfigExt`] reads settings from the
//!   application configuration
//! - `openapi`: `utoipa::ToSchema` for the published types

pub mod constants;
pub mod controller;
pub mod error;
pub mod listeners;
pub mod pipe;
pub mod port;
pub mod settings;
pub mod sink;
pub mod source;
pub mod state;
pub mod station;

#[cfg(feature = "hdhconfig")]
pub mod config_ext;

pub use controller::RelayController;
pub use error::{ErrorKind, FailureReport, RelayError, Result};
pub use listeners::{listeners_for_mount, IcecastStatusClient, IdleMonitor};
pub use pipe::{PipeOutcome, RelayPipe};
pub use port::ControlPort;
pub use settings::{BackoffPolicy, IdleSettings, RelaySettings};
pub use sink::{
    IcecastConnection, IcecastProtocol, IcecastSinkClient, MountConfig, SinkConnector, StreamInfo,
    StreamSink,
};
pub use source::{SourceConnector, StreamSource, TunerSourceClient, TunerStream};
pub use state::{ControlEvent, RelayState, SelectionState};
pub use station::{Station, StationRegistry};

#[cfg(feature = "hdhconfig")]
pub use config_ext::RelayConfigExt;
