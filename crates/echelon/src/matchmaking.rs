//! Player hand-off to game servers.
//!
//! ```text
//! request_join(player, "Arena1")
//!   1. snapshot player + server        (read lock)
//!   2. AddPlayer(token, ..) → server   (no lock held)
//!   3. commit_join                     (write lock, everything re-checked)
//! ```
//!
//! Between 2 and 3 the server may have been evicted by the liveness sweep,
//! or the player may have logged out. The commit then fails and the caller
//! gets `PermissionDenied`; the game server is told to drop the player
//! again.
//!
//! Tokens are not stored. The game server validates the player that shows
//! up with it.

use std::sync::Arc;

use echelon_protocol::{Callback, SessionId, Variant};
use echelon_session::{SessionError, SessionRegistry};
use echelon_transport::{CallError, CallbackHandle};

use crate::ServiceError;

/// Length of a join token in bytes before hex encoding.
pub const TOKEN_BYTES: usize = 16;

/// A fresh capability string: 128 bits from the thread-local CSPRNG,
/// lowercase hex.
pub fn generate_join_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct MatchmakingBroker {
    registry: Arc<SessionRegistry>,
}

impl MatchmakingBroker {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Hands `player` to the game server called `server_name` and returns
    /// the join token.
    ///
    /// # Errors
    /// - `State` if the player has not selected a tank.
    /// - `PermissionDenied("server unavailable")` if the server is not
    ///   registered or stops answering.
    /// - `PermissionDenied("already in a game")` if the player is already
    ///   attached somewhere or the tank is on the roster.
    /// - `PermissionDenied("server is full")` at the player limit.
    /// - `PermissionDenied("server refused the player")` if the game server
    ///   rejects the call.
    pub async fn request_join(
        &self,
        player: SessionId,
        server_name: &str,
    ) -> Result<String, ServiceError> {
        let session = self
            .registry
            .get(player)
            .await
            .ok_or(SessionError::NotFound(player))?;
        let state = session.player().ok_or(SessionError::WrongVariant {
            id: player,
            expected: Variant::Player,
            actual: session.variant(),
        })?;
        let tank = state
            .active_tank()
            .cloned()
            .ok_or_else(|| ServiceError::State("no tank selected".into()))?;
        if state.in_game() {
            return Err(ServiceError::permission_denied("already in a game"));
        }

        let server = self
            .registry
            .find_by_name(Variant::GameServer, server_name)
            .await
            .ok_or_else(unavailable)?;
        let server_id = server.id;
        let callback = {
            let gs = server.game_server().ok_or_else(unavailable)?;
            if gs.has_tank(&tank.name) {
                return Err(ServiceError::permission_denied("already in a game"));
            }
            if gs.is_full() {
                return Err(ServiceError::permission_denied("server is full"));
            }
            gs.callback().clone()
        };

        let token = generate_join_token();
        let call = Callback::AddPlayer {
            token: token.clone(),
            player_name: session.owner_name.clone(),
            user_level: session.user_level,
            tank: tank.clone(),
        };
        match callback.invoke(call).await {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => {
                tracing::warn!(server = server_name, error = %e, "game server unreachable during join, evicting");
                self.registry.evict_game_server(server_id).await;
                return Err(unavailable());
            }
            Err(CallError::Rejected(reason)) => {
                tracing::info!(player = %session.owner_name, server = server_name, %reason, "game server refused player");
                return Err(ServiceError::permission_denied("server refused the player"));
            }
            Err(e) => {
                tracing::warn!(server = server_name, error = %e, "AddPlayer failed");
                return Err(unavailable());
            }
        }

        if let Err(e) = self.registry.commit_join(player, server_id, &tank.name).await {
            tracing::info!(player = %session.owner_name, server = server_name, error = %e, "join no longer valid after AddPlayer");
            retract(&callback, &tank.name).await;
            return Err(match e {
                SessionError::NotFound(id) if id == server_id => unavailable(),
                other => other.into(),
            });
        }

        Ok(token)
    }
}

fn unavailable() -> ServiceError {
    ServiceError::permission_denied("server unavailable")
}

/// Best-effort undo of an `AddPlayer` that could not be committed.
async fn retract(callback: &CallbackHandle, tank_name: &str) {
    let call = Callback::RemovePlayer {
        tank_name: tank_name.to_string(),
    };
    if let Err(e) = callback.invoke(call).await {
        tracing::debug!(tank = tank_name, error = %e, "could not retract AddPlayer");
    }
}
