//! # hdhtuner - HDHomeRun lineup client
//!
//! Reads the channel lineup of an HDHomeRun tuner and keeps a
//! [`hdhrelay::StationRegistry`] filled with its radio channels.
//!
//! - [`client`]: `discover.json` and `lineup.json` access
//! - [`models`]: API payloads and the radio channel filter
//! - [`catalog`]: background refresher of the station registry
//!
//! ```no_run
//! use hdhrelay::StationRegistry;
//! use hdhtuner::{CatalogSettings, CatalogWorker, HdHomeRunClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = StationRegistry::new();
//!     let client = HdHomeRunClient::new("http://hdhomerun.local")?;
//!     let worker = CatalogWorker::spawn(client, registry.clone(), CatalogSettings::default());
//!
//!     let count = worker.refresh().await?;
//!     println!("{count} radio stations");
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod error;
pub mod models;

#[cfg(feature = "hdhconfig")]
pub mod config_ext;

pub use catalog::{refresh, CatalogSettings, CatalogWorker};
pub use client::{ClientBuilder, HdHomeRunClient};
pub use error::{Error, Result};
pub use models::{radio_stations, DeviceInfo, LineupEntry};

#[cfg(feature = "hdhconfig")]
pub use config_ext::TunerConfigExt;
