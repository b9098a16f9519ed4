//! External collaborators of the Echelon core.
//!
//! The core consumes these through narrow traits and never sees what is
//! behind them:
//!
//! - [`Database`]: named statements in, rows out ([`MemoryDatabase`]).
//! - [`MapStore`]: the downloadable maps ([`MemoryMapStore`],
//!   [`DirectoryMapStore`]).
//! - [`Notifier`]: operator e-mail ([`SendmailNotifier`], [`LogNotifier`]).

mod database;
mod error;
mod maps;
mod memory;
mod notify;

pub use database::{Database, Row, Statement, Value};
pub use error::StoreError;
pub use maps::{
    DirectoryMapStore, MAP_EXTENSION, MAX_MAP_SIZE, MapHandle, MapStore, MemoryMapStore,
    is_map_filename,
};
pub use memory::{AccountRecord, MemoryDatabase};
pub use notify::{LogNotifier, Notifier, SendmailNotifier, spawn_notify};
