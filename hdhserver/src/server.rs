//! Axum server wrapper.
//!
//! Routes are accumulated on a shared [`Router`] before [`Server::start`];
//! APIs added with [`Server::add_openapi`] are nested under `/api/{name}`
//! and their OpenAPI document is served at `/api-docs/{name}.json`.

use crate::logs::{init_logging, log_dump, log_sse, LogState, LoggingOptions};
use anyhow::Context;
use axum::handler::Handler;
use axum::routing::get;
use axum::{Json, Router};
use hdhconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_SERVER_NAME: &str = "HDHRelay";

/// How long [`Server::shutdown`] waits for open connections
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    pub http_port: u16,
    /// Bound address once started
    pub local_addr: Option<String>,
    pub version: String,
}

pub struct Server {
    name: String,
    bind_ip: IpAddr,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    shutdown: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    log_state: Option<LogState>,
}

impl Server {
    pub fn new(name: impl Into<String>, bind_ip: IpAddr, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_ip,
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            shutdown: CancellationToken::new(),
            join_handle: None,
            local_addr: None,
            log_state: None,
        }
    }

    /// Listens on every interface, on `host.http_port`.
    pub fn new_configured() -> Self {
        ServerBuilder::new_configured().build()
    }

    /// Adds a GET endpoint returning the closure result as JSON.
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Adds a stateful GET handler (SSE feeds, dumps...)
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Nests `api_router` under `/api/{name}` and serves its document at
    /// `/api-docs/{name}.json`.
    pub async fn add_openapi(
        &mut self,
        api_router: Router,
        openapi: utoipa::openapi::OpenApi,
        name: &str,
    ) {
        let openapi = Arc::new(openapi);
        let doc_route = Router::new().route(
            &format!("/api-docs/{name}.json"),
            get(move || {
                let openapi = openapi.clone();
                async move { Json(openapi.as_ref().clone()) }
            }),
        );

        let nested = Router::new().nest(&format!("/api/{name}"), api_router);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(nested).merge(doc_route);
    }

    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, route)
        };
    }

    /// Snapshot of the routes registered so far
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Binds the listener and serves in the background.
    ///
    /// Routes added after this call are not served.
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = SocketAddr::new(self.bind_ip, self.http_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;
        let local_addr = listener.local_addr()?;

        let router = self.router().await;
        let shutdown = self.shutdown.clone();
        let name = self.name.clone();

        self.join_handle = Some(tokio::spawn(async move {
            let served = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match served {
                Ok(()) => info!(server = %name, "HTTP server stopped"),
                Err(err) => warn!(server = %name, "HTTP server failed: {err}"),
            }
        }));

        info!(server = %self.name, "HTTP server listening on http://{local_addr}");
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stops accepting connections and waits for in-flight requests.
    ///
    /// SSE feeds never end on their own, so connections still open after
    /// [`SHUTDOWN_GRACE`] are dropped.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        let Some(mut handle) = self.join_handle.take() else {
            return;
        };

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            warn!(server = %self.name, forced = true, "HTTP connections still open, closing them");
            handle.abort();
            let _ = handle.await;
        }
    }

    pub async fn wait(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            if let Err(err) = handle.await {
                warn!("HTTP server task join error: {err}");
            }
        }
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            http_port: self.http_port,
            local_addr: self.local_addr.map(|addr| addr.to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Installs the global log subscriber and registers `/log-sse`,
    /// `/log-dump` and the `logs` API.
    pub async fn init_logging(&mut self, options: LoggingOptions) -> anyhow::Result<LogState> {
        let log_state = init_logging(options)?;
        self.add_log_routes(log_state.clone()).await;
        self.log_state = Some(log_state.clone());
        Ok(log_state)
    }

    /// Registers the log routes for an already installed [`LogState`].
    pub async fn add_log_routes(&mut self, log_state: LogState) {
        use utoipa::OpenApi;

        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_openapi(
            crate::logs::create_logs_router(log_state),
            crate::logs::LogsApiDoc::openapi(),
            "logs",
        )
        .await;
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }
}

pub struct ServerBuilder {
    name: String,
    bind_ip: IpAddr,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        Self::new(DEFAULT_SERVER_NAME, get_config().get_http_port())
    }

    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.bind_ip, self.http_port)
    }
}
