use clap::Parser;
use hdhconfig::init_config;
use hdhrelay::{
    IcecastSinkClient, IcecastStatusClient, IdleMonitor, RelayConfigExt, RelayController,
    StationRegistry, TunerSourceClient,
};
use hdhserver::relay_api::RelayApiState;
use hdhserver::{ConfigExt, LoggingOptions, RelayExt, ServerBuilder};
use hdhtuner::{CatalogWorker, TunerConfigExt};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hdhrelay", version, about)]
struct Args {
    /// Configuration directory (defaults to ./.hdhrelay, then ~/.hdhrelay)
    #[arg(long, env = "HDHRELAY_CONFIG")]
    config_dir: Option<String>,

    /// Station to relay at startup, guide number or name; overrides relay.autostart
    #[arg(long, env = "HDHRELAY_SELECT")]
    select: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ========== Configuration & logging ==========
    let config = init_config(args.config_dir.as_deref().unwrap_or(""))?;

    let mut server = ServerBuilder::new_configured().build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await?;
    info!(config = %config.directory().display(), "Starting HDHRelay");

    // ========== Tuner catalog ==========
    let tuner = config.get_tuner_client()?;
    match tuner.device_info().await {
        Ok(device) => info!(
            tuner = %tuner.base_url(),
            device_id = %device.device_id,
            model = %device.model_number,
            tuners = device.tuner_count,
            "Found {}",
            device.friendly_name
        ),
        Err(err) => warn!(tuner = %tuner.base_url(), "Tuner not reachable yet: {err}"),
    }

    let registry = StationRegistry::new();
    let catalog = CatalogWorker::spawn(
        tuner.clone(),
        registry.clone(),
        config.get_catalog_settings()?,
    );
    match timeout(tuner.timeout(), catalog.wait_ready()).await {
        Ok(Ok(count)) => info!(stations = count, "Station catalog loaded"),
        Ok(Err(err)) => warn!("Station catalog unavailable: {err}"),
        Err(_) => warn!("Station catalog not loaded yet, selections are refused until it is"),
    }

    // ========== Relay ==========
    let settings = config.get_relay_settings()?;
    let mount = config.get_icecast_mount()?;
    info!(mount = %mount.target(), protocol = ?mount.protocol, "Icecast target");

    let source = Arc::new(TunerSourceClient::new(&settings)?);
    let sink = Arc::new(IcecastSinkClient::new(mount.clone(), &settings));
    let (controller, port) = RelayController::spawn(registry, source, sink, settings.clone());

    let status_client = IcecastStatusClient::new(
        config.get_icecast_status_url()?,
        mount.mount.clone(),
        settings.connect_timeout,
    )?;
    let monitor = IdleMonitor::spawn(status_client, port.clone(), config.get_idle_settings()?);

    let autostart = match args.select {
        Some(station) => Some(station),
        None => config.get_relay_autostart()?,
    };
    let autostart = autostart.map(|station| catalog.select_when_ready(port.clone(), station));

    // ========== HTTP ==========
    let server_info = server.info();
    server
        .add_route("/info", move || {
            let info = server_info.clone();
            async move { info }
        })
        .await;
    server.init_config_api().await;
    server
        .init_relay_api(RelayApiState::new(port.clone()).with_listeners(monitor.listeners()))
        .await;
    server.start().await?;

    info!("HDHRelay is ready, press Ctrl+C to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C, shutting down: {err}");
    }

    // ========== Shutdown ==========
    info!("Shutting down");
    if let Some(autostart) = autostart {
        autostart.abort();
    }
    server.shutdown().await;

    if let Err(err) = port.shutdown() {
        warn!("Relay controller already stopped: {err}");
    }
    controller.wait().await?;

    monitor.shutdown().await;
    catalog.shutdown().await;

    info!("HDHRelay stopped");
    Ok(())
}
