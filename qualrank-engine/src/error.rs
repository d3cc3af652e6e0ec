//! Per-mutation failure taxonomy
//!
//! Each mutation resolves to `Result<Applied, TransitionError>`; the worker
//! decides from the variant whether the record is marked processed, retried
//! or left for an operator.

use qualrank_common::db::TierId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransitionError {
    /// Mutation does not apply to the row's current state (double withdraw,
    /// REGISTER on a confirmed row, re-seeding a populated class)
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Referenced tier, class or qualifier does not exist
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Tier was closed after the mutation was enqueued
    #[error("Tier {0} is closed")]
    TierClosed(TierId),

    /// SQLite reported BUSY/LOCKED
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(qualrank_common::Error),

    /// The class failed its post-transition consistency check
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl TransitionError {
    /// Short tag stored in the mutation's outcome / last_error text
    pub fn tag(&self) -> &'static str {
        match self {
            TransitionError::InvalidTransition(_) => "no-op",
            TransitionError::UnknownTarget(_) => "dropped",
            TransitionError::TierClosed(_) => "tier-closed",
            TransitionError::StorageConflict(_) => "storage-conflict",
            TransitionError::Storage(_) => "storage",
            TransitionError::InvariantViolation(_) => "invariant",
        }
    }

    /// Errors that consume the mutation (marked processed, never retried)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransitionError::InvalidTransition(_) | TransitionError::UnknownTarget(_)
        )
    }
}

impl From<qualrank_common::Error> for TransitionError {
    fn from(err: qualrank_common::Error) -> Self {
        if err.is_storage_conflict() {
            return TransitionError::StorageConflict(err.to_string());
        }
        match err {
            qualrank_common::Error::NotFound(what) => TransitionError::UnknownTarget(what),
            qualrank_common::Error::TierClosed(id) => TransitionError::TierClosed(TierId(id)),
            other => TransitionError::Storage(other),
        }
    }
}

impl From<sqlx::Error> for TransitionError {
    fn from(err: sqlx::Error) -> Self {
        qualrank_common::Error::from(err).into()
    }
}
