//! Server-initiated calls to a connected peer.
//!
//! The core never talks to a game server's socket directly. It holds a
//! [`CallbackHandle`] inside the game server's session and invokes
//! [`Callback`]s through it. Whatever sits behind the handle (the
//! WebSocket front end, or a mock in tests) implements [`PeerCallback`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use echelon_protocol::Callback;
use tokio::sync::Mutex;

use crate::CallError;

/// Something that can deliver a [`Callback`] to a peer and report whether
/// the peer accepted it.
///
/// Implementations don't need to enforce timeouts or serialization;
/// [`CallbackHandle`] does both.
#[async_trait]
pub trait PeerCallback: Send + Sync + 'static {
    async fn invoke(&self, call: Callback) -> Result<(), CallError>;
}

/// A shareable, time-limited reference to one peer's callback.
///
/// Cloning is cheap and every clone shares the same gate: no matter how
/// many tasks hold a clone, at most one call is in flight to the peer at
/// a time. The timeout covers the call itself, not the wait for the gate;
/// a call the peer doesn't answer in time fails with
/// [`CallError::TimedOut`].
#[derive(Clone)]
pub struct CallbackHandle {
    peer: Arc<dyn PeerCallback>,
    gate: Arc<Mutex<()>>,
    timeout: Duration,
}

impl CallbackHandle {
    /// Default per-call deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8_000);

    pub fn new(peer: Arc<dyn PeerCallback>, timeout: Duration) -> Self {
        Self {
            peer,
            gate: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delivers `call` to the peer.
    ///
    /// # Errors
    /// - [`CallError::TimedOut`] if the peer took longer than the timeout
    ///   to answer.
    /// - Whatever the peer implementation reports otherwise.
    pub async fn invoke(&self, call: Callback) -> Result<(), CallError> {
        let name = call.name();
        let _turn = self.gate.lock().await;

        match tokio::time::timeout(self.timeout, self.peer.invoke(call)).await {
            Ok(result) => {
                tracing::trace!(call = name, ok = result.is_ok(), "callback finished");
                result
            }
            Err(_) => {
                tracing::debug!(call = name, timeout = ?self.timeout, "callback timed out");
                Err(CallError::TimedOut(self.timeout))
            }
        }
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================
