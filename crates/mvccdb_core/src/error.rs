//! Error types for mvccdb core.

use crate::types::TransactionId;
use mvccdb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in mvccdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `begin` was called inside an active transaction.
    #[error("nested transactions are not supported")]
    NestedTransaction,

    /// A transaction operation was called outside a transaction.
    #[error("transaction is not started")]
    TransactionNotStarted,

    /// The operation is only valid on a prepared child database.
    #[error("operation requires a prepared database")]
    NotPrepared,

    /// `begin` was called on a prepared child database.
    #[error("cannot begin a transaction on a prepared database")]
    PreparedBegin,

    /// `commit` was called on a prepared child database.
    #[error("cannot commit on a prepared database")]
    PreparedCommit,

    /// `rollback` was called on a prepared child database.
    #[error("cannot rollback on a prepared database")]
    PreparedRollback,

    /// Root `commit` was attempted while a prepared descendant still
    /// holds unmerged writes.
    #[error("a prepared database still holds unmerged changes")]
    PreparedDbIsDirty,

    /// `prepare` was called with the nil transaction identity.
    #[error("transaction id is nil")]
    TidIsNil,

    /// `prepare` was called with an identity already registered.
    #[error("transaction id {0} already exists")]
    TidExists(TransactionId),

    /// A merge failed because a sibling's visible write invalidated this
    /// child's pre-image.
    #[error("conflict with sibling transaction {0}")]
    ConflictWithSibling(TransactionId),

    /// The requested key does not exist.
    #[error("key not found")]
    KeyNotFound,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Wraps a backend error, surfacing the missing-key sentinel as
    /// [`CoreError::KeyNotFound`] and everything else verbatim.
    #[must_use]
    pub fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::KeyNotFound => Self::KeyNotFound,
            other => Self::Storage(other),
        }
    }
}
