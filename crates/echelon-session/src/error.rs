//! Error types for the session layer.

use echelon_protocol::{SessionId, Variant};

/// Errors that can occur while looking up or mutating sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session has this id. It was never registered, or it has
    /// since been removed (logout, expiry, eviction).
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session exists but is of a different variant than the
    /// operation requires.
    #[error("session {id} is a {actual} session, expected {expected}")]
    WrongVariant {
        id: SessionId,
        expected: Variant,
        actual: Variant,
    },

    /// The registry already holds its configured maximum of sessions.
    #[error("session registry is full ({0} sessions)")]
    RegistryFull(usize),

    /// The tank is already on a roster, or the player is already
    /// attached to a game server.
    #[error("{0} is already in a game")]
    AlreadyInGame(String),

    /// The game server's roster has reached its player limit.
    #[error("game server {server} is full ({limit} players)")]
    ServerFull { server: String, limit: u32 },
}
