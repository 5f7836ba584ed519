//! Storage backend trait definition.

use crate::error::StorageResult;

/// A durable key-value backend for mvccdb.
///
/// Storage backends are **opaque byte stores**: keys are arbitrary
/// non-empty byte strings, values arbitrary byte blobs. Backends do not
/// interpret what they store. Versioning, staging, and transaction
/// semantics all live a layer above.
///
/// # Invariants
///
/// - `get` of a missing key returns [`StorageError::KeyNotFound`], a
///   dedicated sentinel distinguishable from I/O errors
/// - `delete` of a missing key succeeds
/// - Operations after `close` return [`StorageError::Closed`]
/// - Backends must be `Send + Sync`; a single backend is shared by every
///   database handle in a tree
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - For testing and ephemeral state
/// - [`super::FileBackend`] - For persistent storage
///
/// [`StorageError::KeyNotFound`]: crate::StorageError::KeyNotFound
/// [`StorageError::Closed`]: crate::StorageError::Closed
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent, `EmptyKey` for an
    /// empty key, or an I/O error from the underlying store.
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>>;

    /// Stores `val` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key or an I/O error from the
    /// underlying store.
    fn put(&self, key: &[u8], val: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`, if any.
    ///
    /// Deleting an absent key is a no-op and succeeds.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key or an I/O error from the
    /// underlying store.
    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Closes the backend, flushing any buffered state.
    ///
    /// Subsequent operations return `Closed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&self) -> StorageResult<()>;
}
