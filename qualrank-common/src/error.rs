//! Common error types for qualrank

use thiserror::Error;

/// Common result type for qualrank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the engine and its callers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Mutation submitted for a tier that no longer accepts changes
    #[error("Tier {0} is closed")]
    TierClosed(i64),

    /// Internal error (corrupt row, impossible state)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying SQLite error is a lock/busy conflict.
    ///
    /// Primary result codes SQLITE_BUSY (5) and SQLITE_LOCKED (6); extended
    /// codes carry the primary code in the low byte.
    pub fn is_storage_conflict(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false),
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
