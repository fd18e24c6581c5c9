//! Process-wide gateway state.
//!
//! A small typed record behind a reader-writer lock (readers are frequent:
//! control loops and HTTP handlers; writers are rare: the dispatcher and the
//! admin drain), plus the node-ready gate. The gate opens when the attached
//! device reports its identity and closes again on reboot, so unicast
//! operations never race the handshake.

use std::sync::RwLock;

use tokio::sync::watch;

use crate::protobuf::meshtastic::kiezbox_message::Mode;

#[derive(Debug)]
struct Inner {
    my_node_num: Option<u32>,
    mode: Mode,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            my_node_num: None,
            mode: Mode::Normal,
        }
    }
}

#[derive(Debug)]
pub struct SharedState {
    inner: RwLock<Inner>,
    ready: watch::Sender<bool>,
}

impl SharedState {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner::default()),
            ready,
        }
    }

    /// Record the attached node's identity and open the ready gate.
    pub fn set_my_node_num(&self, node_num: u32) {
        self.inner
            .write()
            .expect("state lock poisoned")
            .my_node_num = Some(node_num);
        self.ready.send_replace(true);
    }

    pub fn my_node_num(&self) -> Option<u32> {
        self.inner.read().expect("state lock poisoned").my_node_num
    }

    /// Close the ready gate; unicast operations wait for the next MyInfo.
    pub fn mark_not_ready(&self) {
        self.ready.send_replace(false);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.write().expect("state lock poisoned").mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.inner.read().expect("state lock poisoned").mode
    }

    /// Wait until the device has reported its identity. Returns immediately
    /// when the gate is already open.
    pub async fn node_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in self, so wait_for can only fail after the state
        // itself is gone.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
