//! Best-effort fan-out of encoded frames to push clients.
//!
//! A client is registered with [`BroadcastChannel::on_client_connect`] and
//! immediately receives the handshake acknowledgement. Frames published
//! while at least one client is connected are forwarded verbatim; each
//! client has a small bounded queue and misses frames while it is full.
//! Publishing never blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Literal acknowledgement sent to every client on connect.
pub const HANDSHAKE_ACK: &str = "OK";

/// Frames queued per client before new frames are dropped for it.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

pub type ClientId = u64;

/// What a push client receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// The handshake acknowledgement ([`HANDSHAKE_ACK`]).
    Ack,
    /// One encoded frame.
    Frame(Bytes),
}

struct Shared {
    connected: AtomicBool,
    next_id: AtomicU64,
    queue_depth: usize,
    clients: Mutex<HashMap<ClientId, mpsc::Sender<PushMessage>>>,
}

/// Cloneable handle to the broadcast state.
#[derive(Clone)]
pub struct BroadcastChannel {
    shared: Arc<Shared>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                queue_depth: queue_depth.max(1),
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Whether any client is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Register a client. Its queue starts with [`PushMessage::Ack`].
    pub fn on_client_connect(&self) -> PushClient {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        // One extra slot keeps the ack from ever displacing a frame.
        let (tx, rx) = mpsc::channel(self.shared.queue_depth + 1);
        let _ = tx.try_send(PushMessage::Ack);

        let mut clients = self.clients();
        clients.insert(id, tx);
        self.shared.connected.store(true, Ordering::Release);
        debug!(client = id, clients = clients.len(), "push client connected");
        drop(clients);

        PushClient {
            id,
            rx,
            channel: self.clone(),
        }
    }

    /// Forget a client. `connected` drops to false with the last one.
    pub fn on_client_disconnect(&self, id: ClientId) {
        let mut clients = self.clients();
        if clients.remove(&id).is_some() {
            debug!(client = id, clients = clients.len(), "push client disconnected");
        }
        if clients.is_empty() {
            self.shared.connected.store(false, Ordering::Release);
        }
    }

    /// Forward `frame` to every connected client. Returns how many clients
    /// it was queued for.
    pub fn publish(&self, frame: Bytes) -> usize {
        if !self.is_connected() {
            return 0;
        }

        let mut clients = self.clients();
        let mut delivered = 0;
        clients.retain(|id, tx| match tx.try_send(PushMessage::Frame(frame.clone())) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!(client = *id, "client queue full, frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = *id, "push client went away");
                false
            }
        });
        if clients.is_empty() {
            self.shared.connected.store(false, Ordering::Release);
        }
        delivered
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, mpsc::Sender<PushMessage>>> {
        self.shared
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ── PushClient ───────────────────────────────────────────────────

/// Receiving end for one push client. Disconnects itself on drop.
pub struct PushClient {
    id: ClientId,
    rx: mpsc::Receiver<PushMessage>,
    channel: BroadcastChannel,
}

impl PushClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.channel.on_client_disconnect(self.id);
    }
}
