//! Transport abstraction layer for Echelon.
//!
//! Two directions of traffic go through this crate:
//!
//! - **Inbound**: [`Transport`] accepts connections, [`Connection`] moves
//!   frames and reports the [`PeerAddresses`] of the call.
//! - **Outbound**: [`PeerCallback`] is how the core pushes calls to a peer
//!   ("invoke or fail"), and [`CallbackHandle`] wraps one with a timeout
//!   and one-call-at-a-time serialization.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod callback;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use callback::{CallbackHandle, PeerCallback};
pub use error::{CallError, TransportError};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The two endpoints of a call: where it came from and where it arrived.
///
/// Captured once when a session is created and never changed afterwards.
/// The remote IP is what the game-server allow-list is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddresses {
    pub remote: SocketAddr,
    pub local: SocketAddr,
}

impl PeerAddresses {
    pub fn new(remote: SocketAddr, local: SocketAddr) -> Self {
        Self { remote, local }
    }
}

impl fmt::Display for PeerAddresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.remote, self.local)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
///
/// `send` and `recv` may be called from different tasks at the same time:
/// a game server's handler sits in `recv` while the matchmaking broker
/// pushes an `AddPlayer` call through `send`.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote/local address pair of this connection.
    fn addresses(&self) -> PeerAddresses;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_peer_addresses_display() {
        let addrs = PeerAddresses::new(
            "10.0.0.5:50123".parse().unwrap(),
            "10.0.0.1:31337".parse().unwrap(),
        );
        assert_eq!(addrs.to_string(), "10.0.0.5:50123 -> 10.0.0.1:31337");
        assert_eq!(addrs.remote.ip().to_string(), "10.0.0.5");
    }
}
