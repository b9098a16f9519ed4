//! Messages exchanged with peers over the WebSocket front end.
//!
//! ```text
//! peer                                   echelon
//!  │── Auth { call_id, .. } ──────────────→│  (any number, before login)
//!  │←────────── Response / Error { call_id }│
//!  │── Login / JoinAsGameServer ──────────→│
//!  │←───────────────────── LoginAck/Error ─│
//!  │── Request { call_id, .. } ───────────→│
//!  │←────────── Response / Error { call_id }│
//!  │←──────────────── Call { call_id, .. } ─│  (game servers only)
//!  │── Reply { call_id, outcome } ────────→│
//! ```
//!
//! Every enum uses serde's internally tagged representation, so a login
//! frame looks like `{"type":"Login","variant":"Player",...}`.

use serde::{Deserialize, Serialize};

use crate::types::{
    AccountEdit, AccountInfo, GameMode, MatchStatistics, OnlineUser, ServerInfo, SessionId,
    TankAttributes, UserLevel, Variant,
};

// ---------------------------------------------------------------------------
// Peer → server
// ---------------------------------------------------------------------------

/// Every frame a peer can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First frame of a player, admin, map editor or health monitor.
    Login {
        variant: Variant,
        username: String,
        password: String,
    },

    /// First frame of a game server.
    JoinAsGameServer {
        name: String,
        secret: String,
        /// Port players should connect to when no relay is used.
        port: u16,
        #[serde(default)]
        using_relay: bool,
        #[serde(default)]
        relay_host: Option<String>,
        #[serde(default)]
        relay_port: Option<u16>,
    },

    /// An operation on the sender's own session.
    Request { call_id: u64, request: Request },

    /// A game server's answer to a [`ServerMessage::Call`].
    Reply { call_id: u64, outcome: CallOutcome },

    /// An operation that needs no session. Only accepted before login.
    Auth { call_id: u64, request: AuthRequest },
}

/// Operations available to a connection that has not logged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum AuthRequest {
    /// Registers a member account.
    CreateAccount {
        username: String,
        password: String,
        email: String,
    },
    /// The client version this server expects.
    CheckCurrentVersion,
    /// Largest map upload accepted, in bytes.
    CheckMaxMapSize,
}

/// Operations a logged-in peer may invoke. Which ones are allowed depends
/// on the session variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Request {
    // -- Any variant --
    KeepAlive,
    Logout,

    // -- Players --
    GetTankList,
    SelectTank { tank_name: String },
    RequestJoin { server_name: String },
    GetRank,
    GetAccountPoints,
    GetPointsForRank { rank: u32 },
    GetRanksOfTanks { tank_names: Vec<String> },
    CheckCurrentVersion,
    CreateTank { tank: TankAttributes },
    /// Changes everything but the name; `tank.name` must still be valid.
    UpdateTank { old_name: String, tank: TankAttributes },
    DeleteTank { tank_name: String },

    // -- Listings --
    GetGameServerList,
    GetUserList,
    GetUserCount,

    // -- Maps --
    GetMapList,
    HashIsValid { filename: String, hash: String },
    DownloadMap { filename: String },
    UploadMap {
        filename: String,
        title: String,
        data: Vec<u8>,
    },
    RemoveMap { filename: String },

    // -- Administration --
    KickUser { name: String },
    BanUser { name: String },
    UnbanUser { name: String },
    ForcePlayerLimit { server_name: String, limit: u32 },
    GetAccountList,
    GetAccountByName { name: String },
    CreateAccount {
        username: String,
        password: String,
        email: String,
        user_level: UserLevel,
    },
    EditAccountByName { name: String, account: AccountEdit },
    SetAccountPassword { name: String, password: String },
    DeleteAccountByName { name: String },

    // -- Game servers --
    SetMaxPlayerLimit { limit: u32 },
    PlayerLeft { tank_name: String },
    SetCurrentMap { filename: String },
    SetCurrentGameMode { mode: GameMode },
    SendStatistics { records: Vec<MatchStatistics> },
}

/// How a game server answered a server-initiated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CallOutcome {
    Ok,
    Rejected { message: String },
}

// ---------------------------------------------------------------------------
// Server → peer
// ---------------------------------------------------------------------------

/// Every frame the server can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The login succeeded and this is the new session.
    LoginAck { session_id: SessionId },

    /// Successful result of a [`ClientMessage::Request`].
    Response { call_id: u64, response: Response },

    /// A login or request failed. `call_id` is `None` for login failures.
    Error {
        call_id: Option<u64>,
        kind: ErrorKind,
        message: String,
    },

    /// A server-initiated call that the game server must answer with
    /// [`ClientMessage::Reply`].
    Call { call_id: u64, call: Callback },
}

/// Result payloads. One variant per shape of answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Response {
    Done,
    Token { token: String },
    Tanks { tanks: Vec<TankAttributes> },
    Servers { servers: Vec<ServerInfo> },
    Users { users: Vec<OnlineUser> },
    Count { count: u64 },
    Rank { rank: u32 },
    /// One entry per requested tank, in request order; `-1` for a tank
    /// that does not exist.
    Ranks { ranks: Vec<i32> },
    Points { points: u64 },
    Version { version: String },
    Size { bytes: u64 },
    Accounts { accounts: Vec<AccountInfo> },
    Account { account: AccountInfo },
    Maps { filenames: Vec<String> },
    Valid { valid: bool },
    Map {
        filename: String,
        title: String,
        data: Vec<u8>,
    },
}

/// Client-visible error categories.
///
/// Transport disconnects never reach a client as their own kind; they
/// surface as `PermissionDenied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input. The caller has to fix the request.
    BadInformation,
    /// Authorization or availability failure.
    PermissionDenied,
    /// Something failed on our side. Details are only in the server log.
    Internal,
}

/// Calls the server pushes to a game server through its callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Callback {
    /// Liveness probe.
    KeepAlive,

    /// Admit a player. The game server validates `token` when the player
    /// connects to it.
    AddPlayer {
        token: String,
        player_name: String,
        user_level: UserLevel,
        tank: TankAttributes,
    },

    /// A player left the system; drop their tank from the match.
    RemovePlayer { tank_name: String },

    /// An administrator locked the player limit.
    ForceMaxPlayerLimit { limit: u32 },

    /// The maps currently available for download.
    UpdateMapList { filenames: Vec<String> },
}

impl Callback {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Callback::KeepAlive => "KeepAlive",
            Callback::AddPlayer { .. } => "AddPlayer",
            Callback::RemovePlayer { .. } => "RemovePlayer",
            Callback::ForceMaxPlayerLimit { .. } => "ForceMaxPlayerLimit",
            Callback::UpdateMapList { .. } => "UpdateMapList",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
