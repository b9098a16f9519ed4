//! Error types for the storage collaborators.

use crate::Statement;

/// Errors reported by [`Database`](crate::Database), [`MapStore`](crate::MapStore)
/// and [`Notifier`](crate::Notifier) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A statement was called with the wrong number of arguments.
    #[error("{statement} takes {expected} arguments, got {got}")]
    Arity {
        statement: Statement,
        expected: usize,
        got: usize,
    },

    /// An argument had the wrong type for its position.
    #[error("{statement}: argument {index} must be {expected}")]
    Argument {
        statement: Statement,
        index: usize,
        expected: &'static str,
    },

    /// A result row was shorter than the caller expected.
    #[error("row has no column {0}")]
    MissingColumn(usize),

    /// A result column held a different type than the caller expected.
    #[error("column {index} is not {expected}")]
    ColumnType { index: usize, expected: &'static str },

    /// The statement is not supported by this backend.
    #[error("{0} is not supported by this database")]
    Unsupported(Statement),

    /// Reading maps or spawning the mailer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mailer ran but reported failure.
    #[error("notification failed: {0}")]
    Notify(String),
}
