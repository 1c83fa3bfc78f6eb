mod core;
mod engine;
mod hal;
mod icy;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wecker_core::config::Config;
use wecker_core::store::{AlarmStore, RuntimeState, StationStore};

use crate::core::{AppCore, AppEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // File logging; the appliance has no terminal attached.
    if let Some(parent) = config.paths.log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.paths.log_file)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,wecker_daemon=debug,wecker_core=debug")
            }),
        )
        .init();

    info!("log file: {:?}", config.paths.log_file);
    info!("config loaded from: {:?}", Config::config_path());

    let stations = StationStore::load(&config.paths.stations_file);
    if stations.is_empty() {
        warn!("no stations configured; alarms and playback have nothing to play");
    }
    let alarms = AlarmStore::load(&config.paths.alarms_file, &stations);
    let runtime = RuntimeState::load(&config.paths.state_file);

    // Task reports and raw input edges both end up in the one consumer loop.
    let (events_tx, events_rx) = mpsc::channel::<AppEvent>(256);
    let (edges_tx, edges_rx) = mpsc::channel(256);

    hal::start_input(&config.input, edges_tx);

    let shutdown_tx = events_tx.clone();
    tokio::spawn(async move {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("sigterm handler unavailable: {e}");
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
            _ = term.recv() => info!("termination requested"),
        }
        let _ = shutdown_tx.send(AppEvent::Shutdown).await;
    });

    let app = AppCore::new(
        config, stations, alarms, runtime, events_tx, events_rx, edges_rx,
    )?;
    info!("daemon initialised, running event loop");
    app.run().await
}
