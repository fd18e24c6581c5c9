//! Envelope codec: pure functions between byte buffers and the schema types.
//!
//! Encoding must match the device firmware byte-for-byte, which prost
//! guarantees as long as both sides compile the same schema. Everything here
//! is side-effect free; the link loops own all I/O.

use bytes::Bytes;
use prost::Message;

use crate::protobuf::meshtastic as proto;
use crate::protobuf::meshtastic::{
    from_radio, kiezbox_message, mesh_packet, to_radio, AdminMessage, Data, FromRadio, Heartbeat,
    KiezboxMessage, MeshPacket, PortNum, ToRadio,
};

/// Destination address for control commands that every node should apply.
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Channel index used for Kiezbox control traffic.
pub const CONTROL_CHANNEL: u32 = 2;

/// Application payload extracted from an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPayload {
    pub port: PortNum,
    pub from: u32,
    pub payload: Bytes,
}

/// Serialize an outbound envelope.
pub fn encode(envelope: &ToRadio) -> Vec<u8> {
    envelope.encode_to_vec()
}

/// Decode an inbound envelope. Unknown payload variants decode to an
/// envelope with no variant set and are ignored downstream.
pub fn decode(bytes: &[u8]) -> Result<FromRadio, prost::DecodeError> {
    FromRadio::decode(bytes)
}

/// Initial handshake envelope; the id correlates the device's config burst.
pub fn want_config(config_id: u32) -> ToRadio {
    ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::WantConfigId(config_id)),
    }
}

/// Keep-alive envelope for the serial link.
pub fn heartbeat() -> ToRadio {
    ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Heartbeat(Heartbeat {})),
    }
}

/// Wrap a control command into a packet envelope bound for `target`.
pub fn wrap_control(control: kiezbox_message::Control, target: u32, channel: u32) -> ToRadio {
    let message = KiezboxMessage {
        update: None,
        control: Some(control),
    };
    let data = Data {
        portnum: PortNum::KiezboxControlApp as i32,
        payload: message.encode_to_vec().into(),
        ..Default::default()
    };
    packet_envelope(data, target, channel)
}

/// Wrap an admin request (module config poll) bound for `target`.
pub fn wrap_admin_request(request: AdminMessage, target: u32) -> ToRadio {
    let data = Data {
        portnum: PortNum::AdminApp as i32,
        payload: request.encode_to_vec().into(),
        want_response: true,
        ..Default::default()
    };
    packet_envelope(data, target, 0)
}

fn packet_envelope(data: Data, target: u32, channel: u32) -> ToRadio {
    ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
            from: 0,
            to: target,
            channel,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(data)),
            ..Default::default()
        })),
    }
}

/// Unwrap `Packet -> Decoded -> Data` from an inbound envelope. Encrypted
/// packets and envelopes that are not packets yield `None`.
pub fn extract_app(envelope: &FromRadio) -> Option<AppPayload> {
    let packet = match envelope.payload_variant.as_ref()? {
        from_radio::PayloadVariant::Packet(p) => p,
        _ => return None,
    };
    match packet.payload_variant.as_ref()? {
        mesh_packet::PayloadVariant::Decoded(data) => Some(AppPayload {
            port: PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp),
            from: packet.from,
            payload: data.payload.clone(),
        }),
        mesh_packet::PayloadVariant::Encrypted(_) => None,
    }
}

/// Build the admin poll asking the device for its Kiezbox module config.
pub fn module_config_request() -> AdminMessage {
    AdminMessage {
        payload_variant: Some(proto::admin_message::PayloadVariant::GetModuleConfigRequest(
            proto::admin_message::ModuleConfigType::KiezboxControl as i32,
        )),
    }
}
