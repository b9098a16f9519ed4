//! Server-initiated calls over a game server's own WebSocket connection.
//!
//! ```text
//! CallbackHandle::invoke ─→ RemotePeer ── Call{call_id} ──→ game server
//!                               ▲                              │
//!        PendingCalls[call_id] ─┘ ←─ handler ←─ Reply{call_id} ─┘
//! ```
//!
//! The connection handler is the only reader of the socket, so replies
//! reach the waiting caller through [`PendingCalls`]. Calls are held back
//! until the handler has sent `LoginAck`, which keeps the ack the first
//! frame a game server sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use echelon_protocol::{CallOutcome, Callback, Codec, ServerMessage};
use echelon_transport::{CallError, Connection, PeerCallback, WebSocketConnection};
use tokio::sync::{oneshot, watch};

/// Calls sent to one peer that are still waiting for their reply.
pub(crate) struct PendingCalls {
    next_call_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
    ready: watch::Sender<bool>,
    closed: AtomicBool,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            next_call_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
            ready: watch::Sender::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Lets held-back calls go out.
    pub(crate) fn open(&self) {
        self.ready.send_replace(true);
    }

    /// Hands a reply to its caller. Returns `false` for an unknown or
    /// abandoned call id.
    pub(crate) fn resolve(&self, call_id: u64, outcome: CallOutcome) -> bool {
        let sender = self.lock().remove(&call_id);
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Fails every waiting and future call with `Disconnected`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiting receiver.
        self.lock().clear();
        self.ready.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn register(&self) -> (u64, oneshot::Receiver<CallOutcome>) {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(call_id, tx);
        (call_id, rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<CallOutcome>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a call from [`PendingCalls`] when its caller stops waiting,
/// for instance because the callback timeout fired.
struct PendingSlot<'a> {
    pending: &'a PendingCalls,
    call_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.call_id);
    }
}

/// [`PeerCallback`] for a peer connected over WebSocket.
pub(crate) struct RemotePeer<C: Codec> {
    conn: Arc<WebSocketConnection>,
    codec: C,
    pending: Arc<PendingCalls>,
}

impl<C: Codec> RemotePeer<C> {
    pub(crate) fn new(conn: Arc<WebSocketConnection>, codec: C, pending: Arc<PendingCalls>) -> Self {
        Self {
            conn,
            codec,
            pending,
        }
    }
}

fn disconnected() -> CallError {
    CallError::Disconnected("connection closed".into())
}

#[async_trait]
impl<C: Codec> PeerCallback for RemotePeer<C> {
    async fn invoke(&self, call: Callback) -> Result<(), CallError> {
        let mut ready = self.pending.ready.subscribe();
        let opened = ready.wait_for(|open| *open).await.is_ok();
        if !opened || self.pending.is_closed() {
            return Err(disconnected());
        }

        let (call_id, reply) = self.pending.register();
        let _slot = PendingSlot {
            pending: &self.pending,
            call_id,
        };

        let frame = self
            .codec
            .encode(&ServerMessage::Call { call_id, call })
            .map_err(|e| CallError::Rejected(format!("could not encode call: {e}")))?;
        self.conn
            .send(&frame)
            .await
            .map_err(|e| CallError::Disconnected(e.to_string()))?;
        tracing::trace!(conn_id = %self.conn.id(), call_id, "call sent");

        match reply.await {
            Ok(CallOutcome::Ok) => Ok(()),
            Ok(CallOutcome::Rejected { message }) => Err(CallError::Rejected(message)),
            Err(_) => Err(disconnected()),
        }
    }
}
