//! # Echelon
//!
//! Session broker and matchmaking backend for a multiplayer tank game.
//!
//! Players, administrators, map editors, health monitors and game servers
//! log in over WebSocket. Echelon keeps one session per login, expires the
//! idle ones, probes game servers for liveness, hands players to game
//! servers with a one-time join token, and folds finished-match
//! statistics into ranks.
//!
//! ```text
//! WebSocket ─→ handler ─→ Echelon ─┬─ AuthGateway ───────┐
//!                                  ├─ accounts, tanks ───┤
//!                                  ├─ MatchmakingBroker ─┼─→ SessionRegistry ←─ sweeps
//!                                  ├─ StatisticsRecorder ┴─→ Database
//!                                  └─ maps ─────────────────→ MapStore
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use echelon::prelude::*;
//!
//! # async fn run() -> Result<(), EchelonError> {
//! let server = EchelonServer::builder()
//!     .bind("0.0.0.0:31337")
//!     .build(
//!         Arc::new(MemoryDatabase::new()),
//!         Arc::new(MemoryMapStore::new()),
//!         Arc::new(LogNotifier),
//!     )
//!     .await?;
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! server.run_until(stop_rx).await
//! # }
//! ```

pub mod accounts;
pub mod auth;
pub mod dispatch;
mod error;
mod handler;
pub mod matchmaking;
pub mod password;
pub mod rank;
mod remote;
mod server;
pub mod statistics;
pub mod tanks;
pub mod watchdog;
mod world;

pub use auth::{AuthGateway, GameServerJoin, GatewayConfig};
pub use error::{BAD_CREDENTIALS, EchelonError, ServiceError};
pub use matchmaking::{MatchmakingBroker, generate_join_token};
pub use server::{EchelonServer, EchelonServerBuilder};
pub use statistics::{StatisticsRecorder, StatisticsSummary};
pub use tanks::TankRules;
pub use watchdog::{LoginWatchdog, WatchdogConfig};
pub use world::{Echelon, EchelonConfig};

/// Everything needed to embed a server, in one import.
pub mod prelude {
    pub use crate::{
        Echelon, EchelonConfig, EchelonError, EchelonServer, GatewayConfig, ServiceError,
        TankRules, WatchdogConfig,
    };
    pub use echelon_protocol::{
        ClientMessage, ErrorKind, Request, Response, ServerMessage, SessionId, UserLevel, Variant,
    };
    pub use echelon_session::SessionConfig;
    pub use echelon_store::{
        Database, DirectoryMapStore, LogNotifier, MapStore, MemoryDatabase, MemoryMapStore,
        Notifier, SendmailNotifier,
    };
}
