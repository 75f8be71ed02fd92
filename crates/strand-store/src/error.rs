//! Error types for the store module.

use thiserror::Error;

use crate::model::Model;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// `create` found an existing record under the key.
    #[error("{model} record already exists: {key}")]
    AlreadyExists { model: Model, key: String },

    /// A write was attempted inside a read transaction.
    #[error("write to {0} inside a read transaction")]
    ReadOnly(Model),

    /// The adapter aborted the operation; safe to retry.
    #[error("operation aborted: {0}")]
    Aborted(String),

    /// The blocking task running the operation failed.
    #[error("storage task failed: {message}")]
    TaskFailed { cancelled: bool, message: String },

    /// A lock guarding adapter state was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Errors worth retrying: busy or locked databases, aborts and
    /// cancelled storage tasks.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Aborted(_) => true,
            StoreError::TaskFailed { cancelled, .. } => *cancelled,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::TaskFailed {
            cancelled: e.is_cancelled(),
            message: e.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> StoreError {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_transient_classification() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_transient());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_transient());
        assert!(StoreError::Aborted("tab closed".into()).is_transient());
        assert!(StoreError::TaskFailed {
            cancelled: true,
            message: String::new()
        }
        .is_transient());

        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT).is_transient());
        assert!(!StoreError::TaskFailed {
            cancelled: false,
            message: "panicked".into()
        }
        .is_transient());
        assert!(!StoreError::Serialization("bad cbor".into()).is_transient());
        assert!(!StoreError::ReadOnly(Model::Miniblocks).is_transient());
    }
}
