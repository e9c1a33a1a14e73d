//! # hdhserver - HTTP surface of the relay
//!
//! An axum [`Server`] wrapper that collects routes from the other crates:
//!
//! - [`logs`]: global subscriber with a runtime level switch, ring buffer,
//!   `/log-dump` and the `/log-sse` live feed
//! - [`relay_api`]: REST/SSE binding of the relay control port
//! - [`ConfigExt`]: the `hdhconfig` REST API
//!
//! Every documented API is nested under `/api/{name}` with its OpenAPI
//! document at `/api-docs/{name}.json`.
//!
//! ```rust,no_run
//! use hdhserver::{relay_api, ConfigExt, RelayExt, ServerBuilder};
//! use hdhserver::logs::LoggingOptions;
//!
//! # async fn run(port: hdhrelay::ControlPort) -> anyhow::Result<()> {
//! let mut server = ServerBuilder::new_configured().build();
//! server.init_logging(LoggingOptions::default()).await?;
//! server.init_config_api().await;
//! server.init_relay_api(relay_api::RelayApiState::new(port)).await;
//!
//! server.start().await?;
//! tokio::signal::ctrl_c().await?;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config_ext;
pub mod logs;
pub mod relay_api;
pub mod server;

pub use config_ext::ConfigExt;
pub use logs::{log_dump, log_sse, LogState, LoggingOptions, SseLayer};
pub use relay_api::{RelayApiDoc, RelayApiState};
pub use server::{Server, ServerBuilder, ServerInfo};

/// Mounts the relay control API on a [`Server`]
pub trait RelayExt {
    /// Registers [`relay_api`] as `relay` (`/api/relay/...`).
    async fn init_relay_api(&mut self, state: RelayApiState);
}

impl RelayExt for Server {
    async fn init_relay_api(&mut self, state: RelayApiState) {
        use utoipa::OpenApi;

        self.add_openapi(
            relay_api::create_router(state),
            RelayApiDoc::openapi(),
            "relay",
        )
        .await;
    }
}
