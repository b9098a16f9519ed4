//! Session tracking for Echelon.
//!
//! This crate owns the live state of the broker:
//!
//! 1. **Sessions**: one [`Session`] per authenticated peer, a common header
//!    plus a variant payload ([`SessionPayload`]).
//! 2. **Registry**: [`SessionRegistry`], the concurrent map enforcing one
//!    session per (variant, name) and the player/roster invariant.
//! 3. **Sweeps**: periodic expiry of idle sessions and liveness probes of
//!    game servers ([`SessionRegistry::spawn_sweeps`]).
//! 4. **[`ExpiringSet`]**: the TTL membership primitive, also used by the
//!    login watchdog in the core.
//!
//! # How it fits in the stack
//!
//! ```text
//! Core (above)        ← auth gateway, matchmaking, request dispatch
//!     ↕
//! Session Layer (this crate)  ← who is online, who plays where
//!     ↕
//! Transport / Tick (below)    ← peer callbacks, sweep scheduling
//! ```

mod config;
mod error;
mod expiring;
mod registry;
mod session;
mod sweep;

pub use config::SessionConfig;
pub use error::SessionError;
pub use expiring::ExpiringSet;
pub use registry::{Registration, SessionRegistry};
pub use session::{
    GameServerState, NewSession, PlayerState, RelayEndpoint, RosterEntry, Session, SessionPayload,
};
pub use sweep::SweepHandles;
