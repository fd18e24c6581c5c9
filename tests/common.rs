//! Shared helpers for the integration tests: scripted serial endpoints and
//! an in-memory store double.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prost::Message;

use kiezbox_gateway::db::{Point, Store, StoreError};
use kiezbox_gateway::meshtastic::framer;
use kiezbox_gateway::meshtastic::{PortFactory, PortPair};
use kiezbox_gateway::protobuf::meshtastic::kiezbox_message::{
    update, Core, CoreValues, Meta, Mode, Router, Update,
};
use kiezbox_gateway::protobuf::meshtastic::{
    from_radio, mesh_packet, Data, FromRadio, KiezboxMessage, MeshPacket, MyNodeInfo, PortNum,
    ToRadio,
};

/// Behaviour of a [`ScriptedReader`] once its chunks are exhausted.
pub enum Then {
    /// Keep timing out, like an idle serial port.
    TimeoutForever,
    /// Fail the next read, breaking the link.
    Error,
}

/// Reader half double that serves scripted byte chunks.
pub struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    then: Then,
}

impl ScriptedReader {
    pub fn new(chunks: Vec<Vec<u8>>, then: Then) -> Self {
        Self {
            chunks: chunks.into(),
            then,
        }
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            None => match self.then {
                Then::TimeoutForever => {
                    // Pace the reader loop like a real port timeout would.
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout"))
                }
                Then::Error => Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure")),
            },
        }
    }
}

impl Write for ScriptedReader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer half double capturing everything the gateway sends.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Decode all complete outbound envelopes captured so far.
    pub fn envelopes(&self) -> Vec<ToRadio> {
        let bytes = self.contents();
        let mut reader = framer::FrameReader::new();
        let mut events = Vec::new();
        reader.push(&bytes, &mut events);
        events
            .into_iter()
            .filter_map(|event| match event {
                framer::FrameEvent::Frame(frame) => ToRadio::decode(frame.as_slice()).ok(),
                framer::FrameEvent::Debug(_) => None,
            })
            .collect()
    }
}

impl Read for SharedSink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(5));
        Err(io::Error::new(io::ErrorKind::TimedOut, "sink is write-only"))
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory handing out the given endpoints in order; further opens fail.
/// Returns the factory plus a counter of open attempts.
pub fn scripted_factory(
    ports: Vec<(ScriptedReader, SharedSink)>,
) -> (PortFactory, Arc<AtomicUsize>) {
    let ports = Arc::new(Mutex::new(VecDeque::from(ports)));
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let factory: PortFactory = Arc::new(move |_settings| {
        counter.fetch_add(1, Ordering::SeqCst);
        match ports.lock().unwrap().pop_front() {
            Some((reader, sink)) => Ok(PortPair {
                reader: Box::new(reader),
                writer: Box::new(sink),
            }),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no scripted endpoint left",
            )),
        }
    });
    (factory, opens)
}

/// In-memory store double with switchable reachability and write deadlines.
pub struct MockStore {
    reachable: AtomicBool,
    timeout_writes: AtomicBool,
    points: Mutex<Vec<Point>>,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            timeout_writes: AtomicBool::new(false),
            points: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_timeout_writes(&self, timeout: bool) {
        self.timeout_writes.store(timeout, Ordering::SeqCst);
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }
}

impl Store for MockStore {
    fn ping(&self) -> impl Future<Output = bool> + Send {
        let reachable = self.reachable.load(Ordering::SeqCst);
        async move { reachable }
    }

    fn write_point(&self, point: &Point) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = if self.timeout_writes.load(Ordering::SeqCst) {
            Err(StoreError::Timeout)
        } else {
            self.points.lock().unwrap().push(point.clone());
            Ok(())
        };
        async move { result }
    }
}

/// A core status update as the device would report it.
pub fn core_update_message(box_id: u32, temperature_out: i32, unix_time: i64) -> KiezboxMessage {
    KiezboxMessage {
        update: Some(Update {
            meta: Some(Meta {
                box_id: Some(box_id),
                ..Default::default()
            }),
            unix_time,
            arrival_time: None,
            values: Some(update::Values::Core(Core {
                mode: Mode::Normal as i32,
                router: Some(Router { powered: true }),
                values: Some(CoreValues {
                    temperature_out: Some(temperature_out),
                    ..Default::default()
                }),
            })),
        }),
        control: None,
    }
}

/// Frame bytes of a packet envelope carrying a Kiezbox message.
pub fn telemetry_frame(message: &KiezboxMessage) -> Vec<u8> {
    let envelope = FromRadio {
        id: 0,
        payload_variant: Some(from_radio::PayloadVariant::Packet(MeshPacket {
            from: 0x42,
            to: 1,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: PortNum::KiezboxControlApp as i32,
                payload: message.encode_to_vec().into(),
                ..Default::default()
            })),
            ..Default::default()
        })),
    };
    framer::frame_payload(&envelope.encode_to_vec())
}

/// Frame bytes of a MyInfo envelope.
pub fn my_info_frame(node_num: u32) -> Vec<u8> {
    let envelope = FromRadio {
        id: 0,
        payload_variant: Some(from_radio::PayloadVariant::MyInfo(MyNodeInfo {
            my_node_num: node_num,
        })),
    };
    framer::frame_payload(&envelope.encode_to_vec())
}

/// Poll `check` until it passes or the timeout elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
