//! # Mesh Device Communication
//!
//! Serial link to the attached mesh device: port ownership, the stream
//! framer, the envelope codec, and the reader/writer loops that bridge the
//! byte stream to the gateway's channels.
//!
//! ## Transport
//!
//! The device speaks length-prefixed protobuf frames over a plain serial
//! line (`0x94 0xC3 <len> <payload>`), with free-form debug text between
//! frames. The serial crate is synchronous, so the reader runs on a blocking
//! thread and communicates with the async side exclusively through bounded
//! channels; the writer is an async task that drains the outbound queue.
//!
//! ## Reconnection
//!
//! The reader owns the port lifecycle. Any read error closes the link
//! (re-arming the node-ready gate) and the reader re-opens the endpoint
//! every [`RECONNECT_DELAY`] until it succeeds, re-issuing the
//! `WantConfigId` handshake each time. Outbound envelopes queued while the
//! port is away stay in the queue; the writer only drops a message when it
//! is asked to send while no endpoint exists.

pub mod codec;
pub mod dispatch;
pub mod framer;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::logutil::{hex_preview, printable_line};
use crate::protobuf::meshtastic::{FromRadio, ToRadio};
use crate::state::SharedState;
use framer::{FrameEvent, FrameReader};

/// Capacity of the inbound/outbound envelope queues.
pub const CHANNEL_CAPACITY: usize = 10;

/// Delay between open attempts after the link breaks.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Port read timeout; bounds the reader thread's cancellation latency.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Byte-level endpoint of the device link. The production implementation is
/// a serial port; tests substitute in-memory doubles.
pub trait SerialIo: Read + Write + Send {}

impl<T: Read + Write + Send> SerialIo for T {}

#[derive(Debug, Clone)]
pub struct PortSettings {
    pub device: String,
    pub baud: u32,
}

/// Independently usable halves of one endpoint, so the reader can block in
/// `read` without holding the writer up.
pub struct PortPair {
    pub reader: Box<dyn SerialIo>,
    pub writer: Box<dyn SerialIo>,
}

/// Opens an endpoint for the given settings. Injected so tests can run the
/// full link against scripted byte streams.
pub type PortFactory = Arc<dyn Fn(&PortSettings) -> io::Result<PortPair> + Send + Sync>;

/// Factory for real serial hardware.
pub fn system_port_factory() -> PortFactory {
    use serialport::SerialPort as _;
    Arc::new(|settings: &PortSettings| {
        let reader = serialport::new(&settings.device, settings.baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        let writer = reader.try_clone().map_err(io::Error::from)?;
        Ok(PortPair {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    })
}

/// Build a handshake envelope with a fresh random config id.
pub fn fresh_want_config() -> ToRadio {
    let config_id: u32 = rand::random();
    debug!("Requesting device config with id {:#010x}", config_id);
    codec::want_config(config_id)
}

/// Owns the serial endpoint and the two direction channels.
///
/// The reader half of the port lives on the reader thread; the writer half
/// sits behind a mutex here so [`run_writer`] can reach it. All other code
/// talks to the device through the channels only.
pub struct DeviceLink {
    settings: PortSettings,
    factory: PortFactory,
    writer_port: Mutex<Option<Box<dyn SerialIo>>>,
    to_tx: mpsc::Sender<ToRadio>,
    from_tx: mpsc::Sender<FromRadio>,
    state: Arc<SharedState>,
}

impl DeviceLink {
    /// Create the link and its channels. Returns the link plus the receiving
    /// ends: the outbound queue for [`run_writer`] and the inbound queue for
    /// the dispatcher.
    pub fn new(
        settings: PortSettings,
        factory: PortFactory,
        state: Arc<SharedState>,
    ) -> (Arc<Self>, mpsc::Receiver<ToRadio>, mpsc::Receiver<FromRadio>) {
        let (to_tx, to_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (from_tx, from_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let link = Arc::new(Self {
            settings,
            factory,
            writer_port: Mutex::new(None),
            to_tx,
            from_tx,
            state,
        });
        (link, to_rx, from_rx)
    }

    /// Handle for enqueueing outbound envelopes. Sends apply backpressure
    /// once the queue holds [`CHANNEL_CAPACITY`] envelopes.
    pub fn sender(&self) -> mpsc::Sender<ToRadio> {
        self.to_tx.clone()
    }

    /// Open the endpoint and enqueue the initial `WantConfigId`.
    ///
    /// Called from the reader thread only: the handshake enqueue blocks on a
    /// full outbound queue, which must not happen on the async runtime.
    fn open(&self) -> Result<Box<dyn SerialIo>> {
        let pair = (self.factory)(&self.settings)
            .with_context(|| format!("failed to open serial port {}", self.settings.device))?;
        *self.writer_port.lock().expect("port lock poisoned") = Some(pair.writer);
        info!(
            "Serial port {} opened with baud rate {}",
            self.settings.device, self.settings.baud
        );
        if self.to_tx.blocking_send(fresh_want_config()).is_err() {
            // Only possible during shutdown, when the writer is gone.
            debug!("Outbound queue closed, skipping handshake");
        }
        Ok(pair.reader)
    }

    /// Close the endpoint and re-arm the node-ready gate.
    pub fn close(&self) {
        *self.writer_port.lock().expect("port lock poisoned") = None;
        self.state.mark_not_ready();
    }

    fn handle_event(&self, event: FrameEvent) {
        match event {
            FrameEvent::Debug(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                debug!(target: "device", "{}", printable_line(&text));
            }
            FrameEvent::Frame(bytes) => {
                trace!(
                    "Frame received ({} bytes): {}",
                    bytes.len(),
                    hex_preview(&bytes, 32)
                );
                match codec::decode(&bytes) {
                    Ok(envelope) => match self.from_tx.try_send(envelope) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Inbound queue full, dropping envelope");
                        }
                        Err(TrySendError::Closed(_)) => {}
                    },
                    Err(e) => warn!("Failed to decode inbound envelope: {}", e),
                }
            }
        }
    }
}

/// Reader loop. Runs on a blocking thread (`tokio::task::spawn_blocking`);
/// never exits except on shutdown. Owns the reader half of the port and the
/// reconnect cycle.
pub fn run_reader(link: Arc<DeviceLink>, token: CancellationToken) {
    let mut port: Option<Box<dyn SerialIo>> = None;
    let mut reader = FrameReader::new();
    let mut events: Vec<FrameEvent> = Vec::new();
    let mut buf = [0u8; 256];

    while !token.is_cancelled() {
        let read_result = match port.as_mut() {
            Some(active) => active.read(&mut buf),
            None => {
                match link.open() {
                    Ok(reader_half) => {
                        // Fresh endpoint, fresh framer state.
                        reader = FrameReader::new();
                        port = Some(reader_half);
                    }
                    Err(e) => {
                        debug!("{:#}", e);
                        info!("Waiting for device to reconnect...");
                        if !sleep_cancellable(&token, RECONNECT_DELAY) {
                            break;
                        }
                    }
                }
                continue;
            }
        };

        match read_result {
            Ok(0) => {
                warn!("Serial endpoint reported end of stream");
                port = None;
                link.close();
            }
            Ok(n) => {
                reader.push(&buf[..n], &mut events);
                for event in events.drain(..) {
                    link.handle_event(event);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Error reading from serial port: {}", e);
                port = None;
                link.close();
            }
        }
    }
    info!("Reader stopped");
}

/// Writer loop. Drains the outbound queue; when the endpoint is away the
/// message is logged and dropped so producers are never wedged on a dead
/// link.
pub async fn run_writer(
    link: Arc<DeviceLink>,
    mut to_rx: mpsc::Receiver<ToRadio>,
    token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => {
                info!("Writer stopped");
                return;
            }
            maybe = to_rx.recv() => match maybe {
                Some(envelope) => envelope,
                None => {
                    info!("Outbound channel closed");
                    return;
                }
            },
        };

        let payload = codec::encode(&envelope);
        let framed = framer::frame_payload(&payload);
        trace!(
            "Sending frame ({} bytes): {}",
            framed.len(),
            hex_preview(&framed, 32)
        );

        {
            let mut guard = link.writer_port.lock().expect("port lock poisoned");
            match guard.as_mut() {
                Some(writer) => {
                    if let Err(e) = writer.write_all(&framed).and_then(|_| writer.flush()) {
                        warn!("Failed to write to serial port: {}", e);
                    }
                }
                None => warn!("Serial port not available, dropping outbound envelope"),
            }
        }
    }
}

/// Sleep in short slices so shutdown is not held up by a reconnect delay.
/// Returns false when cancelled.
fn sleep_cancellable(token: &CancellationToken, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
