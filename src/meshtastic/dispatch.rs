//! Inbound envelope dispatcher.
//!
//! Consumes the link's inbound queue and routes each envelope: device
//! identity updates the shared state and opens the ready gate, a reboot
//! re-arms the gate and renews the config handshake, and application
//! payloads are demultiplexed by port onto the typed channels. The
//! dispatcher never blocks on a slow consumer; when a downstream queue is
//! full the newest message is dropped with a warning.

use std::sync::Arc;

use log::{debug, info, trace, warn};
use prost::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::protobuf::meshtastic::{
    from_radio, AdminMessage, FromRadio, KiezboxMessage, PortNum, ToRadio,
};
use crate::state::SharedState;

use super::codec::{self, AppPayload};
use super::fresh_want_config;

pub async fn run_dispatcher(
    mut from_rx: mpsc::Receiver<FromRadio>,
    to_tx: mpsc::Sender<ToRadio>,
    state: Arc<SharedState>,
    telemetry_tx: mpsc::Sender<KiezboxMessage>,
    admin_tx: mpsc::Sender<AdminMessage>,
    token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => {
                info!("Dispatcher stopped");
                return;
            }
            maybe = from_rx.recv() => match maybe {
                Some(envelope) => envelope,
                None => {
                    info!("Inbound channel closed");
                    return;
                }
            },
        };

        match envelope.payload_variant.as_ref() {
            Some(from_radio::PayloadVariant::MyInfo(info)) => {
                info!("Device reported node id {:#010x}", info.my_node_num);
                state.set_my_node_num(info.my_node_num);
            }
            Some(from_radio::PayloadVariant::Rebooted(_)) => {
                info!("Device rebooted, renewing config handshake");
                state.mark_not_ready();
                if to_tx.send(fresh_want_config()).await.is_err() {
                    return;
                }
            }
            Some(from_radio::PayloadVariant::ConfigCompleteId(id)) => {
                debug!("Device config burst complete (id {:#010x})", id);
            }
            Some(from_radio::PayloadVariant::Packet(_)) => {
                match codec::extract_app(&envelope) {
                    Some(app) => route_app(app, &telemetry_tx, &admin_tx),
                    None => trace!("Encrypted or empty packet, ignoring"),
                }
            }
            None => trace!("Envelope with no payload variant, ignoring"),
        }
    }
}

fn route_app(
    app: AppPayload,
    telemetry_tx: &mpsc::Sender<KiezboxMessage>,
    admin_tx: &mpsc::Sender<AdminMessage>,
) {
    match app.port {
        PortNum::KiezboxControlApp => match KiezboxMessage::decode(app.payload.as_ref()) {
            Ok(message) if message.update.is_some() => {
                trace!("Kiezbox update from {:#010x}", app.from);
                if let Err(TrySendError::Full(_)) = telemetry_tx.try_send(message) {
                    warn!("Telemetry queue full, dropping update");
                }
            }
            Ok(_) => debug!(
                "Kiezbox message from {:#010x} carries no update, ignoring",
                app.from
            ),
            Err(e) => warn!("Failed to decode Kiezbox message: {}", e),
        },
        PortNum::AdminApp => match AdminMessage::decode(app.payload.as_ref()) {
            Ok(message) => {
                if let Err(TrySendError::Full(_)) = admin_tx.try_send(message) {
                    warn!("Admin queue full, dropping response");
                }
            }
            Err(e) => warn!("Failed to decode admin message: {}", e),
        },
        other => debug!(
            "Ignoring payload on port {:?} from {:#010x}",
            other, app.from
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protobuf::meshtastic::kiezbox_message::{update, Core, Update};
    use crate::protobuf::meshtastic::{mesh_packet, to_radio, Data, MeshPacket, MyNodeInfo};

    struct Harness {
        from_tx: mpsc::Sender<FromRadio>,
        to_rx: mpsc::Receiver<ToRadio>,
        telemetry_rx: mpsc::Receiver<KiezboxMessage>,
        admin_rx: mpsc::Receiver<AdminMessage>,
        state: Arc<SharedState>,
        token: CancellationToken,
    }

    fn spawn_dispatcher() -> Harness {
        let (from_tx, from_rx) = mpsc::channel(10);
        let (to_tx, to_rx) = mpsc::channel(10);
        let (telemetry_tx, telemetry_rx) = mpsc::channel(10);
        let (admin_tx, admin_rx) = mpsc::channel(10);
        let state = Arc::new(SharedState::new());
        let token = CancellationToken::new();
        tokio::spawn(run_dispatcher(
            from_rx,
            to_tx,
            state.clone(),
            telemetry_tx,
            admin_tx,
            token.clone(),
        ));
        Harness {
            from_tx,
            to_rx,
            telemetry_rx,
            admin_rx,
            state,
            token,
        }
    }

    fn my_info(node_num: u32) -> FromRadio {
        FromRadio {
            id: 0,
            payload_variant: Some(from_radio::PayloadVariant::MyInfo(MyNodeInfo {
                my_node_num: node_num,
            })),
        }
    }

    fn rebooted() -> FromRadio {
        FromRadio {
            id: 0,
            payload_variant: Some(from_radio::PayloadVariant::Rebooted(true)),
        }
    }

    fn telemetry_packet() -> FromRadio {
        let message = KiezboxMessage {
            update: Some(Update {
                meta: None,
                unix_time: 1_700_000_000,
                arrival_time: None,
                values: Some(update::Values::Core(Core::default())),
            }),
            control: None,
        };
        FromRadio {
            id: 0,
            payload_variant: Some(from_radio::PayloadVariant::Packet(MeshPacket {
                from: 9,
                to: 1,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                    portnum: PortNum::KiezboxControlApp as i32,
                    payload: message.encode_to_vec().into(),
                    ..Default::default()
                })),
                ..Default::default()
            })),
        }
    }

    #[tokio::test]
    async fn my_info_opens_gate() {
        let h = spawn_dispatcher();
        h.from_tx.send(my_info(0x1234)).await.unwrap();
        h.state.node_ready().await;
        assert_eq!(h.state.my_node_num(), Some(0x1234));
        h.token.cancel();
    }

    #[tokio::test]
    async fn reboot_rearms_gate_and_requests_config() {
        let mut h = spawn_dispatcher();
        h.from_tx.send(my_info(7)).await.unwrap();
        h.state.node_ready().await;

        h.from_tx.send(rebooted()).await.unwrap();
        let envelope = h.to_rx.recv().await.expect("want config envelope");
        match envelope.payload_variant {
            Some(to_radio::PayloadVariant::WantConfigId(first)) => {
                assert!(!h.state.is_ready());

                // A second reboot yields a fresh id.
                h.from_tx.send(rebooted()).await.unwrap();
                let next = h.to_rx.recv().await.expect("second want config");
                match next.payload_variant {
                    Some(to_radio::PayloadVariant::WantConfigId(second)) => {
                        assert_ne!(first, second);
                    }
                    other => panic!("unexpected envelope {:?}", other),
                }
            }
            other => panic!("unexpected envelope {:?}", other),
        }
        h.token.cancel();
    }

    #[tokio::test]
    async fn telemetry_routed_to_channel() {
        let mut h = spawn_dispatcher();
        h.from_tx.send(telemetry_packet()).await.unwrap();
        let message = h.telemetry_rx.recv().await.expect("telemetry message");
        assert_eq!(message.update.unwrap().unix_time, 1_700_000_000);
        h.token.cancel();
        let _ = h.admin_rx;
    }

    #[tokio::test]
    async fn unknown_port_is_dropped() {
        let mut h = spawn_dispatcher();
        let envelope = FromRadio {
            id: 0,
            payload_variant: Some(from_radio::PayloadVariant::Packet(MeshPacket {
                from: 9,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                    portnum: PortNum::TextMessageApp as i32,
                    payload: b"hello".to_vec().into(),
                    ..Default::default()
                })),
                ..Default::default()
            })),
        };
        h.from_tx.send(envelope).await.unwrap();
        // Nothing arrives on either typed channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.telemetry_rx.try_recv().is_err());
        assert!(h.admin_rx.try_recv().is_err());
        h.token.cancel();
    }
}
