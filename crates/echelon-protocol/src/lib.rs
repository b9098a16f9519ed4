//! Shared vocabulary for Echelon.
//!
//! - **Types** ([`SessionId`], [`Variant`], [`UserLevel`], [`TankAttributes`],
//!   [`ServerInfo`], ...) used by every other crate.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`], [`Callback`]) that
//!   travel over the WebSocket front end.
//! - **Codec** ([`Codec`], [`JsonCodec`]) turning messages into frames.
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Session registry / core
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    AuthRequest, CallOutcome, Callback, ClientMessage, ErrorKind, Request, Response,
    ServerMessage,
};
pub use types::{
    AccountEdit, AccountInfo, GameMode, MatchStatistics, OnlineUser, ServerInfo, SessionId,
    TankAttributes, UserLevel, Variant,
};
