//! Periodic control loops and one-shot control commands.
//!
//! Three periodic concerns keep the device side healthy: a heartbeat so the
//! firmware keeps the serial API alive, a module-config poll so the gateway
//! tracks the device's operating mode, and the admin drain that folds poll
//! responses into the shared state. One-shot operations build a Kiezbox
//! control command and enqueue it on the link: `set_time` unicasts to the
//! attached node, value sets broadcast to the whole mesh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::meshtastic::codec;
use crate::protobuf::meshtastic::kiezbox_message::{control, Control, Meta, Mode};
use crate::protobuf::meshtastic::{admin_message, module_config, AdminMessage, ToRadio};
use crate::state::SharedState;

/// Period of the serial keep-alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the module-config poll.
pub const CONFIG_INTERVAL: Duration = Duration::from_secs(30);

/// Optional node filter attached to a broadcast control command. Present
/// fields must all match on the receiving node for the command to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFilter {
    pub box_id: Option<u32>,
    pub dist_id: Option<u32>,
    pub sens_id: Option<u32>,
    pub dev_type: Option<u32>,
}

impl ControlFilter {
    fn into_meta(self) -> Meta {
        Meta {
            box_id: self.box_id,
            dist_id: self.dist_id,
            sens_id: self.sens_id,
            dev_type: self.dev_type,
        }
    }
}

/// Build a control command from an HTTP-style key/value pair. Returns `None`
/// for unknown keys or unparsable values. The meta filter is always present
/// on the wire, empty when no filter fields were supplied.
pub fn build_control_message(key: &str, value: &str, filter: &ControlFilter) -> Option<Control> {
    let set = match key {
        "mode" => {
            let raw: i32 = value.parse().ok()?;
            let mode = Mode::try_from(raw).ok()?;
            control::Set::Mode(mode as i32)
        }
        "unix_time" => control::Set::UnixTime(value.parse().ok()?),
        "router_power" => control::Set::RouterPower(parse_bool(value)?),
        "box_id" => control::Set::BoxId(value.parse().ok()?),
        "dist_id" => control::Set::DistId(value.parse().ok()?),
        "sens_id" => control::Set::SensId(value.parse().ok()?),
        "status_interval" => control::Set::StatusInterval(value.parse().ok()?),
        _ => return None,
    };
    Some(Control {
        meta: Some(filter.clone().into_meta()),
        set: Some(set),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" => Some(true),
        "0" => Some(false),
        _ => value.parse().ok(),
    }
}

/// Broadcast a control command to the mesh.
pub async fn send_control(to_tx: &mpsc::Sender<ToRadio>, control: Control) -> Result<()> {
    let envelope = codec::wrap_control(control, codec::BROADCAST_ADDR, codec::CONTROL_CHANNEL);
    to_tx
        .send(envelope)
        .await
        .map_err(|_| anyhow!("device link is shut down"))
}

/// One-shot: push the current system time to the attached node's RTC.
/// Waits for the device identity, then unicasts the command.
pub async fn set_time(
    to_tx: mpsc::Sender<ToRadio>,
    state: Arc<SharedState>,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = state.node_ready() => {}
    }
    let Some(node) = state.my_node_num() else {
        return;
    };
    let now = chrono::Utc::now().timestamp();
    info!("Setting device time to unix time {}", now);
    let control = Control {
        meta: Some(Meta::default()),
        set: Some(control::Set::UnixTime(now)),
    };
    let envelope = codec::wrap_control(control, node, codec::CONTROL_CHANNEL);
    if to_tx.send(envelope).await.is_err() {
        warn!("Device link gone before time could be set");
    }
}

/// Periodic keep-alive. Does not wait for the device identity; the firmware
/// accepts heartbeats before the handshake completes.
pub async fn run_heartbeat(
    to_tx: mpsc::Sender<ToRadio>,
    token: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Heartbeat stopped");
                return;
            }
            _ = ticker.tick() => {
                debug!("Sending heartbeat");
                if to_tx.send(codec::heartbeat()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Periodic module-config poll, gated on the node-ready gate so the request
/// can be unicast to the attached node.
pub async fn run_config_poll(
    to_tx: mpsc::Sender<ToRadio>,
    state: Arc<SharedState>,
    token: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Config poll stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => {
                info!("Config poll stopped");
                return;
            }
            _ = state.node_ready() => {}
        }
        let Some(node) = state.my_node_num() else {
            continue;
        };
        debug!("Polling module config from node {:#010x}", node);
        let envelope = codec::wrap_admin_request(codec::module_config_request(), node);
        if to_tx.send(envelope).await.is_err() {
            return;
        }
    }
}

/// Drain admin responses; a Kiezbox module-config response updates the
/// observed mode in the shared state.
pub async fn run_admin_drain(
    mut admin_rx: mpsc::Receiver<AdminMessage>,
    state: Arc<SharedState>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => {
                info!("Admin drain stopped");
                return;
            }
            maybe = admin_rx.recv() => match maybe {
                Some(message) => message,
                None => return,
            },
        };

        match message.payload_variant {
            Some(admin_message::PayloadVariant::GetModuleConfigResponse(config)) => {
                match config.payload_variant {
                    Some(module_config::PayloadVariant::KiezboxControl(kb)) => {
                        let mode = kb.mode();
                        info!("Device reports mode {:?}", mode);
                        state.set_mode(mode);
                    }
                    None => debug!("Module config response without Kiezbox section"),
                }
            }
            _ => debug!("Ignoring admin message without module config response"),
        }
    }
}
