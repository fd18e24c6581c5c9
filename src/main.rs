//! Binary entrypoint for the Kiezbox gateway service.
//!
//! Wires the pipeline together: serial link reader/writer, the envelope
//! dispatcher, the periodic control loops, the store writer with its retry
//! sweeper, and the local HTTP API. One cancellation token stops every loop;
//! shutdown waits for all of them before closing the link.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kiezbox_gateway::api::{self, ApiContext};
use kiezbox_gateway::config::GatewayConfig;
use kiezbox_gateway::control;
use kiezbox_gateway::db::{writer, InfluxDb};
use kiezbox_gateway::meshtastic::{
    self, dispatch, DeviceLink, PortSettings, CHANNEL_CAPACITY,
};
use kiezbox_gateway::protobuf::meshtastic::KiezboxMessage;
use kiezbox_gateway::state::SharedState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::parse();
    init_logging(config.verbose);
    info!("Starting kiezbox-gateway v{}", env!("CARGO_PKG_VERSION"));

    // The only fatal configuration error: store loops without credentials.
    let store_settings = config.store_settings()?;

    let state = Arc::new(SharedState::new());
    let (link, to_rx, from_rx) = DeviceLink::new(
        PortSettings {
            device: config.serial_device.clone(),
            baud: config.serial_baud,
        },
        meshtastic::system_port_factory(),
        state.clone(),
    );
    let to_tx = link.sender();

    let (telemetry_tx, telemetry_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (admin_tx, admin_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let reader = {
        let link = link.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || meshtastic::run_reader(link, token))
    };
    tasks.push(tokio::spawn(meshtastic::run_writer(
        link.clone(),
        to_rx,
        token.clone(),
    )));
    tasks.push(tokio::spawn(dispatch::run_dispatcher(
        from_rx,
        to_tx.clone(),
        state.clone(),
        telemetry_tx,
        admin_tx,
        token.clone(),
    )));
    tasks.push(tokio::spawn(control::run_heartbeat(
        to_tx.clone(),
        token.clone(),
        control::HEARTBEAT_INTERVAL,
    )));
    tasks.push(tokio::spawn(control::run_config_poll(
        to_tx.clone(),
        state.clone(),
        token.clone(),
        control::CONFIG_INTERVAL,
    )));
    tasks.push(tokio::spawn(control::run_admin_drain(
        admin_rx,
        state.clone(),
        token.clone(),
    )));

    if config.settime {
        tasks.push(tokio::spawn(control::set_time(
            to_tx.clone(),
            state.clone(),
            token.clone(),
        )));
    }

    let store = store_settings.map(|settings| Arc::new(InfluxDb::new(settings, config.db_timeout())));
    match (&store, config.dbwriter) {
        (Some(store), true) => {
            tasks.push(tokio::spawn(writer::run_db_writer(
                telemetry_rx,
                store.clone(),
                config.cache_dir.clone(),
                token.clone(),
            )));
        }
        _ => {
            tasks.push(tokio::spawn(drain_telemetry(telemetry_rx, token.clone())));
        }
    }
    if let (Some(store), true) = (&store, config.dbretry) {
        tasks.push(tokio::spawn(writer::run_db_retry(
            store.clone(),
            config.cache_dir.clone(),
            config.retry_interval(),
            token.clone(),
        )));
    }

    let ctx = Arc::new(ApiContext {
        state: state.clone(),
        to_device: to_tx.clone(),
        mode_override: config.mode_override,
        started: Instant::now(),
    });
    tasks.push(tokio::spawn({
        let token = token.clone();
        let port = config.api_port;
        async move {
            if let Err(e) = api::serve(ctx, port, token).await {
                error!("API server failed: {:#}", e);
            }
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    token.cancel();

    for task in tasks {
        let _ = task.await;
    }
    let _ = reader.await;
    link.close();
    info!("Gateway stopped");
    Ok(())
}

/// Sink for telemetry when the store writer is disabled; keeps the
/// dispatcher's channel from filling up.
async fn drain_telemetry(
    mut telemetry_rx: mpsc::Receiver<KiezboxMessage>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            maybe = telemetry_rx.recv() => match maybe {
                Some(_) => log::debug!("Store writer disabled, discarding update"),
                None => return,
            },
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
    });
    builder.init();
}
