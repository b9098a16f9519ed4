//! Session types: the record the registry keeps for every live peer.
//!
//! A [`Session`] is a common header (who, from where, how privileged, how
//! recently active) plus a [`SessionPayload`] that carries what only one
//! variant needs: a player's tanks, a game server's roster and callback.
//!
//! ```text
//!  Session ─┬─ id / owner_name / addresses / user_level / last_active_at
//!           └─ payload ─┬─ Player(PlayerState)         tanks, active tank, joined server
//!                       ├─ Admin
//!                       ├─ MapEditor
//!                       ├─ GameServer(GameServerState) roster, limits, map, callback
//!                       └─ HealthMonitor
//! ```
//!
//! Back-references between sessions are ids, never pointers: a player in
//! a game stores the [`SessionId`] of its game server and the registry
//! resolves it at time of use.

use std::collections::HashMap;
use std::time::Duration;

use echelon_protocol::{
    GameMode, ServerInfo, SessionId, TankAttributes, UserLevel, Variant,
};
use echelon_transport::{CallbackHandle, PeerAddresses};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// NewSession
// ---------------------------------------------------------------------------

/// Everything needed to register a session, minus what the registry
/// assigns itself (id, timestamps, expiry threshold).
#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_name: String,
    pub addresses: PeerAddresses,
    pub user_level: UserLevel,
    pub payload: SessionPayload,
}

impl NewSession {
    pub fn new(
        owner_name: impl Into<String>,
        addresses: PeerAddresses,
        user_level: UserLevel,
        payload: SessionPayload,
    ) -> Self {
        Self {
            owner_name: owner_name.into(),
            addresses,
            user_level,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One authenticated, live connection.
///
/// Values handed out by the registry are snapshots: mutating a returned
/// `Session` does not change the registry. Changes go through the
/// registry's own methods.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Account name, or server name for game servers. Unique per variant.
    pub owner_name: String,
    /// Endpoints of the call that created the session.
    pub addresses: PeerAddresses,
    pub user_level: UserLevel,
    pub created_at: Instant,
    /// Inactivity allowed before the expiry sweep removes the session.
    pub expiry_threshold: Duration,
    pub(crate) last_active_at: Instant,
    pub(crate) payload: SessionPayload,
}

impl Session {
    pub fn variant(&self) -> Variant {
        self.payload.variant()
    }

    pub fn last_active_at(&self) -> Instant {
        self.last_active_at
    }

    pub fn payload(&self) -> &SessionPayload {
        &self.payload
    }

    /// Marks the session active at `now`. Never moves the timestamp back.
    pub(crate) fn refresh(&mut self, now: Instant) {
        if now > self.last_active_at {
            self.last_active_at = now;
        }
    }

    /// `true` once more than `expiry_threshold` has passed since the last
    /// activity.
    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_active_at) > self.expiry_threshold
    }

    pub fn player(&self) -> Option<&PlayerState> {
        match &self.payload {
            SessionPayload::Player(state) => Some(state),
            _ => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.payload {
            SessionPayload::Player(state) => Some(state),
            _ => None,
        }
    }

    pub fn game_server(&self) -> Option<&GameServerState> {
        match &self.payload {
            SessionPayload::GameServer(state) => Some(state),
            _ => None,
        }
    }

    pub fn game_server_mut(&mut self) -> Option<&mut GameServerState> {
        match &mut self.payload {
            SessionPayload::GameServer(state) => Some(state),
            _ => None,
        }
    }

    /// `true` for a player currently attached to a game server.
    pub fn in_game(&self) -> bool {
        self.player().is_some_and(PlayerState::in_game)
    }
}

/// Variant-specific part of a session.
#[derive(Debug, Clone)]
pub enum SessionPayload {
    Player(PlayerState),
    Admin,
    MapEditor,
    GameServer(GameServerState),
    HealthMonitor,
}

impl SessionPayload {
    pub fn variant(&self) -> Variant {
        match self {
            SessionPayload::Player(_) => Variant::Player,
            SessionPayload::Admin => Variant::Admin,
            SessionPayload::MapEditor => Variant::MapEditor,
            SessionPayload::GameServer(_) => Variant::GameServer,
            SessionPayload::HealthMonitor => Variant::HealthMonitor,
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    tanks: Vec<TankAttributes>,
    active_tank: Option<TankAttributes>,
    /// Game server this player was handed to. Maintained by the registry
    /// together with that server's roster.
    pub(crate) game_server: Option<SessionId>,
}

impl PlayerState {
    pub fn new(tanks: Vec<TankAttributes>) -> Self {
        Self {
            tanks,
            ..Self::default()
        }
    }

    pub fn tanks(&self) -> &[TankAttributes] {
        &self.tanks
    }

    pub fn active_tank(&self) -> Option<&TankAttributes> {
        self.active_tank.as_ref()
    }

    /// Makes the tank called `name` the active one.
    ///
    /// Returns `false`, leaving the current choice alone, if the player
    /// owns no such tank.
    pub fn select_tank(&mut self, name: &str) -> bool {
        match self.tanks.iter().find(|t| t.name == name) {
            Some(tank) => {
                self.active_tank = Some(tank.clone());
                true
            }
            None => false,
        }
    }

    /// Swaps in a freshly loaded tank list. The active tank follows its
    /// new attributes, or is cleared if the tank is gone.
    pub fn replace_tanks(&mut self, tanks: Vec<TankAttributes>) {
        self.active_tank = self
            .active_tank
            .take()
            .and_then(|active| tanks.iter().find(|t| t.name == active.name).cloned());
        self.tanks = tanks;
    }

    pub fn game_server(&self) -> Option<SessionId> {
        self.game_server
    }

    pub fn in_game(&self) -> bool {
        self.game_server.is_some()
    }
}

// ---------------------------------------------------------------------------
// GameServerState
// ---------------------------------------------------------------------------

/// Where players reach a game server that sits behind a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
}

/// A player handed to a game server, keyed by tank name in the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub player: SessionId,
    pub player_name: String,
    pub user_level: UserLevel,
}

#[derive(Debug, Clone)]
pub struct GameServerState {
    /// Port players connect to when no relay is used.
    pub port: u16,
    /// Whether the server's address is on the configured allow-list.
    pub approved: bool,
    pub relay: Option<RelayEndpoint>,
    pub current_map: Option<String>,
    pub current_mode: GameMode,
    pub(crate) roster: HashMap<String, RosterEntry>,
    player_limit: u32,
    limit_forced: bool,
    callback: CallbackHandle,
}

impl GameServerState {
    pub const DEFAULT_PLAYER_LIMIT: u32 = 100;

    pub fn new(
        port: u16,
        approved: bool,
        relay: Option<RelayEndpoint>,
        callback: CallbackHandle,
    ) -> Self {
        Self {
            port,
            approved,
            relay,
            current_map: None,
            current_mode: GameMode::default(),
            roster: HashMap::new(),
            player_limit: Self::DEFAULT_PLAYER_LIMIT,
            limit_forced: false,
            callback,
        }
    }

    pub fn callback(&self) -> &CallbackHandle {
        &self.callback
    }

    pub fn roster(&self) -> &HashMap<String, RosterEntry> {
        &self.roster
    }

    pub fn has_tank(&self, tank_name: &str) -> bool {
        self.roster.contains_key(tank_name)
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn player_limit(&self) -> u32 {
        self.player_limit
    }

    pub fn is_limit_forced(&self) -> bool {
        self.limit_forced
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.player_limit as usize
    }

    /// Applies a limit requested by the game server itself.
    ///
    /// Returns `false` and keeps the old value while an administrator
    /// has forced the limit.
    pub fn set_player_limit(&mut self, limit: u32) -> bool {
        if self.limit_forced {
            return false;
        }
        self.player_limit = limit;
        true
    }

    /// Sets and locks the limit; later `set_player_limit` calls are
    /// ignored.
    pub fn force_player_limit(&mut self, limit: u32) {
        self.player_limit = limit;
        self.limit_forced = true;
    }

    /// The listing entry for this server.
    ///
    /// With a relay the advertised endpoint is the relay's; otherwise it is
    /// the server's own IP and announced port.
    pub fn server_info(&self, name: &str, addresses: &PeerAddresses) -> ServerInfo {
        let (host, port) = match &self.relay {
            Some(relay) => (relay.host.clone(), relay.port),
            None => (addresses.remote.ip().to_string(), self.port),
        };
        ServerInfo {
            name: name.to_string(),
            host,
            port,
            approved: self.approved,
            using_relay: self.relay.is_some(),
            player_count: self.roster.len(),
            player_limit: self.player_limit,
            current_map: self.current_map.clone(),
            current_mode: self.current_mode,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
