//! Value types shared by every layer of Echelon.
//!
//! Nothing in here knows about connections, locks, or storage. These are
//! the plain data records that flow between the session registry, the
//! matchmaking broker, the storage collaborators, and the wire.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identity of one registered session.
///
/// Assigned by the registry at registration time from a monotonically
/// increasing counter, so an id is never handed out twice during the
/// lifetime of a registry. `#[serde(transparent)]` keeps it a plain
/// number on the wire: `SessionId(42)` serializes as `42`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// The five kinds of peer that can hold a session.
///
/// Uniqueness of owner names is enforced per variant: an account may be
/// logged in as a player and as an admin at the same time, but never as
/// two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Player,
    Admin,
    MapEditor,
    GameServer,
    HealthMonitor,
}

impl Variant {
    /// Every variant, in a stable order.
    pub const ALL: [Variant; 5] = [
        Variant::Player,
        Variant::Admin,
        Variant::MapEditor,
        Variant::GameServer,
        Variant::HealthMonitor,
    ];
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Player => "player",
            Variant::Admin => "admin",
            Variant::MapEditor => "map-editor",
            Variant::GameServer => "game-server",
            Variant::HealthMonitor => "health-monitor",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// UserLevel
// ---------------------------------------------------------------------------

/// Integer privilege tier stored with every account.
///
/// Negative values are sanctions rather than privileges: an account at
/// [`UserLevel::BANNED`] or [`UserLevel::SUSPENDED`] cannot log in at all,
/// regardless of what level the login variant requires.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserLevel(pub i32);

impl UserLevel {
    pub const BANNED: UserLevel = UserLevel(-99);
    pub const SUSPENDED: UserLevel = UserLevel(-2);
    pub const MEMBER: UserLevel = UserLevel(0);
    pub const DEVELOPER: UserLevel = UserLevel(10);
    pub const ADMINISTRATOR: UserLevel = UserLevel(20);

    pub fn is_banned(self) -> bool {
        self == Self::BANNED
    }

    pub fn is_suspended(self) -> bool {
        self == Self::SUSPENDED
    }
}

impl fmt::Display for UserLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tanks and statistics
// ---------------------------------------------------------------------------

/// A tank owned by an account, as loaded from storage at login.
///
/// Only the fields the broker forwards to a game server on hand-off are
/// kept here. `f32` fields mean this type is `PartialEq` but not `Eq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankAttributes {
    pub name: String,
    pub weapon_id: i32,
    pub speed_factor: f32,
    pub armor_factor: f32,
    /// Packed `0xRRGGBB`.
    pub color: u32,
    pub points: u64,
}

/// One tank's results for one finished match, reported by a game server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatistics {
    pub tank_name: String,
    pub kills: u32,
    pub assists: u32,
    pub deaths: u32,
    pub objectives_completed: u32,
    pub objectives_captured: u32,
}

impl MatchStatistics {
    /// `true` when every counter is zero. Such records carry nothing worth
    /// writing and are skipped by statistics ingestion.
    pub fn is_empty(&self) -> bool {
        self.kills == 0
            && self.assists == 0
            && self.deaths == 0
            && self.objectives_completed == 0
            && self.objectives_captured == 0
    }
}

/// The rule set a game server is currently running.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum GameMode {
    #[default]
    Deathmatch,
    TeamDeathmatch,
    CaptureTheFlag,
    CaptureTheBase,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameMode::Deathmatch => "Deathmatch",
            GameMode::TeamDeathmatch => "Team Deathmatch",
            GameMode::CaptureTheFlag => "Capture the Flag",
            GameMode::CaptureTheBase => "Capture the Base",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// A registered game server as advertised to players.
///
/// `host`/`port` are what a client should connect to: the relay endpoint
/// when the server sits behind a relay, its own address otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub approved: bool,
    pub using_relay: bool,
    pub player_count: usize,
    pub player_limit: u32,
    pub current_map: Option<String>,
    pub current_mode: GameMode,
}

/// One live, non-game-server session as shown to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub name: String,
    pub variant: Variant,
    pub user_level: UserLevel,
    pub playing: bool,
}

/// A stored account as shown to administrators. Never carries the
/// password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    pub email: String,
    /// `%Y-%m-%d %H:%M:%S` UTC, absent for accounts loaded from a seed file.
    pub created: Option<String>,
    pub last_login: Option<String>,
    pub user_level: UserLevel,
    pub points: u64,
}

/// New values for an existing account. Setting `name` to something else
/// renames the account and moves its tanks along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEdit {
    pub name: String,
    pub email: String,
    pub user_level: UserLevel,
}

// =========================================================================
// Tests
// =========================================================================
