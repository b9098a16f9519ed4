use std::time::Duration;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

/// Why a server-initiated call to a peer failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The peer is gone: its connection closed or could not be written.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The peer didn't answer within the call timeout. Handled exactly
    /// like a disconnect.
    #[error("peer did not answer within {0:?}")]
    TimedOut(Duration),

    /// The peer answered, but refused the call.
    #[error("peer rejected the call: {0}")]
    Rejected(String),
}

impl CallError {
    /// `true` for failures that mean the peer should be considered dead.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CallError::Disconnected(_) | CallError::TimedOut(_))
    }
}
