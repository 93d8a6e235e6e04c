//! Desktop command station.
//!
//! Runs the station core against a logging track output, persists state to a
//! directory of JSON documents and serves the text protocol on TCP so JMRI
//! can connect.
//!
//! # Usage
//!
//! ```sh
//! cargo run --bin command_station --features station -- [config.json]
//! RUST_LOG=rs_dcc_station=trace cargo run --bin command_station --features station
//! ```
//!
//! Without a config file every setting takes its default (port 2560,
//! documents under `./data`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rs_dcc_station::config::Config;
use rs_dcc_station::hal::{FileStore, TraceTrack};
use rs_dcc_station::protocol::{register_station_commands, CommandRegistry};
use rs_dcc_station::services::{
    spawn_persist_task, spawn_refresh_task, BroadcastStatus, JmriListener,
};
use rs_dcc_station::station::Station;

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            Config::from_json(&text).with_context(|| format!("parsing config {}", path))
        }
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = load_config()?;
    info!(name = %config.device.name, "starting command station");

    let store = Arc::new(FileStore::open(config.storage.data_dir.as_str())?);
    let track = Arc::new(TraceTrack::default());
    let status = BroadcastStatus::default();
    let station = Station::new(
        track,
        store,
        Arc::new(status.clone()),
        config.station.registry_options(),
    );
    station.load();

    let commands = Arc::new(CommandRegistry::new());
    let registered = register_station_commands(&commands, &station);
    info!(registered, "commands registered");

    let refresh = spawn_refresh_task(
        Arc::clone(station.locos()),
        Duration::from_millis(u64::from(config.station.refresh_interval_ms.max(1))),
    );
    let persist = (config.station.persist_interval_secs > 0).then(|| {
        spawn_persist_task(
            station.clone(),
            Duration::from_secs(u64::from(config.station.persist_interval_secs)),
        )
    });

    if config.listener.enabled {
        let listener = JmriListener::bind(&config.listener.socket_addr(), commands, status).await?;
        tokio::select! {
            result = listener.run() => result?,
            _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
    }

    refresh.abort();
    if let Some(persist) = persist {
        persist.abort();
    }
    let written = station.store();
    info!(written, "state stored, exiting");
    Ok(())
}
