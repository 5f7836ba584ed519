//! Database façade and transaction state machine.

use crate::error::{CoreError, CoreResult};
use crate::staging::StagingTable;
use crate::types::TransactionId;
use mvccdb_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A multi-version transactional view over a durable key-value backend.
///
/// A `Database` supports three modes of access against the same backend:
///
/// 1. Direct passthrough: `get`/`put`/`del` outside a transaction go
///    straight to the backend.
/// 2. A flat transaction: `begin` - `get`/`put`/`del` - `commit` or
///    `rollback`, with all writes buffered in a staging table until
///    commit.
/// 3. Prepared children: inside a transaction, `prepare(tid)` spawns a
///    named child database that accumulates changes independently
///    (typically one per concurrently executed transaction) and merges
///    them back with `check_and_update`, which reports exactly which
///    sibling a conflicting child lost to.
///
/// # Example
///
/// ```rust
/// use mvccdb_core::Database;
/// use mvccdb_storage::MemoryBackend;
/// use std::sync::Arc;
///
/// let db = Database::open(Arc::new(MemoryBackend::new()));
/// db.begin().unwrap();
/// db.put(b"k", b"v").unwrap();
/// assert_eq!(db.get(b"k").unwrap(), b"v");
/// db.commit().unwrap();
/// ```
///
/// # Locking
///
/// Every public operation holds the database's own mutex for its
/// duration; the staging table locks itself internally. Public methods
/// never call other public methods on the same handle, and child
/// operations never take a parent handle's mutex.
pub struct Database {
    tid: TransactionId,
    backend: Arc<dyn StorageBackend>,
    table: Arc<StagingTable>,
    /// Back-reference only; never used for lifetime.
    parent: Option<Weak<Database>>,
    /// Weak self-handle so `prepare` can hand children a back-reference.
    self_ref: Weak<Database>,
    prepared: bool,
    state: Mutex<DbState>,
}

struct DbState {
    in_transaction: bool,
    dirty: bool,
    children: HashMap<TransactionId, Arc<Database>>,
}

impl Database {
    /// Opens a root database over the given backend.
    ///
    /// Allocates a fresh identity for the root and issues no backend
    /// calls.
    #[must_use]
    pub fn open(backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        let tid = TransactionId::next_root();
        let table = StagingTable::new_root(tid, Arc::clone(&backend));
        Arc::new_cyclic(|self_ref| Self {
            tid,
            backend,
            table,
            parent: None,
            self_ref: self_ref.clone(),
            prepared: false,
            state: Mutex::new(DbState {
                in_transaction: false,
                dirty: false,
                children: HashMap::new(),
            }),
        })
    }

    /// Returns this database's transaction identity.
    #[must_use]
    pub fn tid(&self) -> TransactionId {
        self.tid
    }

    /// Returns true if this is a prepared child database.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Returns true if a transaction is active on this handle.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    /// Returns true if this handle holds writes not yet merged or
    /// committed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Returns the parent database of a prepared child, if it is still
    /// alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Database>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `PreparedBegin` on a prepared child (children are born in
    /// a transaction) and `NestedTransaction` when one is already
    /// active.
    pub fn begin(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if self.prepared {
            return Err(CoreError::PreparedBegin);
        }
        if state.in_transaction {
            return Err(CoreError::NestedTransaction);
        }
        state.in_transaction = true;
        Ok(())
    }

    /// Reads the value for `key`.
    ///
    /// Outside a transaction this is a backend passthrough; inside, the
    /// staging table answers, seeing this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` for absent or deleted keys; backend errors
    /// propagate verbatim.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        let state = self.state.lock();
        if !state.in_transaction {
            return self.backend.get(key).map_err(CoreError::from_storage);
        }
        let value = self.table.get(key)?;
        match value.visible() {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(CoreError::KeyNotFound),
        }
    }

    /// Writes `val` under `key`.
    ///
    /// Outside a transaction this is a backend passthrough; inside, the
    /// write is staged and the handle becomes dirty.
    ///
    /// # Errors
    ///
    /// Backend errors propagate verbatim.
    pub fn put(&self, key: &[u8], val: &[u8]) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            return self.backend.put(key, val).map_err(CoreError::from_storage);
        }
        self.table.put(key, val.to_vec())?;
        state.dirty = true;
        Ok(())
    }

    /// Deletes the value under `key`.
    ///
    /// Outside a transaction this is a backend passthrough; inside, a
    /// tombstone is staged and the handle becomes dirty.
    ///
    /// # Errors
    ///
    /// Backend errors propagate verbatim.
    pub fn del(&self, key: &[u8]) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            return self.backend.delete(key).map_err(CoreError::from_storage);
        }
        self.table.del(key)?;
        state.dirty = true;
        Ok(())
    }

    /// Spawns a prepared child database named `tid`.
    ///
    /// The child starts inside a transaction, with an empty staging
    /// table layered over this one. Prepared children may themselves
    /// prepare grandchildren.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotStarted` outside a transaction, `TidIsNil`
    /// for the nil identity, and `TidExists` when `tid` is already
    /// registered.
    pub fn prepare(&self, tid: TransactionId) -> CoreResult<Arc<Database>> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            return Err(CoreError::TransactionNotStarted);
        }
        if tid.is_nil() {
            return Err(CoreError::TidIsNil);
        }
        if state.children.contains_key(&tid) {
            return Err(CoreError::TidExists(tid));
        }

        let table = StagingTable::prepare(&self.table, tid)?;
        let child = Arc::new_cyclic(|self_ref| Database {
            tid,
            backend: Arc::clone(&self.backend),
            table,
            parent: Some(self.self_ref.clone()),
            self_ref: self_ref.clone(),
            prepared: true,
            state: Mutex::new(DbState {
                in_transaction: true,
                dirty: false,
                children: HashMap::new(),
            }),
        });
        state.children.insert(tid, Arc::clone(&child));
        Ok(child)
    }

    /// Merges this prepared child's changes into its parent.
    ///
    /// On success the handle is clean again and the returned identities
    /// name sibling transactions whose merged writes this merge
    /// overwrote; the caller decides whether those siblings must be
    /// re-executed. On conflict nothing is mutated and the error names
    /// the sibling whose write invalidated this child's reads.
    ///
    /// # Errors
    ///
    /// Returns `NotPrepared` on a root handle, `TransactionNotStarted`
    /// outside a transaction, and `ConflictWithSibling` when a captured
    /// pre-image no longer holds.
    pub fn check_and_update(&self) -> CoreResult<Vec<TransactionId>> {
        let mut state = self.state.lock();
        if !self.prepared {
            return Err(CoreError::NotPrepared);
        }
        if !state.in_transaction {
            return Err(CoreError::TransactionNotStarted);
        }
        let supplanted = self.table.merge_to_parent()?;
        state.dirty = false;
        Ok(supplanted)
    }

    /// Discards this prepared child's staged work.
    ///
    /// Descendant children are reset too; the handle stays prepared and
    /// in-transaction, ready for re-execution.
    ///
    /// # Errors
    ///
    /// Returns `NotPrepared` on a root handle and
    /// `TransactionNotStarted` outside a transaction.
    pub fn reset(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !self.prepared {
            return Err(CoreError::NotPrepared);
        }
        if !state.in_transaction {
            return Err(CoreError::TransactionNotStarted);
        }
        for child in state.children.values() {
            child.clear_dirty_subtree();
        }
        self.table.purge();
        state.dirty = false;
        Ok(())
    }

    /// Commits the root transaction, flushing staged writes to the
    /// backend.
    ///
    /// Default and clean records are skipped; tombstones delete, the
    /// rest put. After a successful flush the staging table is purged,
    /// the child registry is cleared (prepared handles from this
    /// transaction are no longer valid), and the handle leaves the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `PreparedCommit` on a child, `TransactionNotStarted`
    /// outside a transaction, and `PreparedDbIsDirty` while any
    /// descendant still holds unmerged writes. A backend error aborts
    /// the flush and leaves the transaction open.
    pub fn commit(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if self.prepared {
            return Err(CoreError::PreparedCommit);
        }
        if !state.in_transaction {
            return Err(CoreError::TransactionNotStarted);
        }
        if state.children.values().any(|child| child.dirty_subtree()) {
            return Err(CoreError::PreparedDbIsDirty);
        }

        let flushed = self.table.flush_to(self.backend.as_ref())?;
        tracing::debug!(tid = %self.tid, flushed, "committed transaction");

        self.table.purge();
        self.table.clear_children();
        state.children.clear();
        state.in_transaction = false;
        state.dirty = false;
        Ok(())
    }

    /// Rolls back the root transaction.
    ///
    /// Every registered child is reset (the registry is kept), the
    /// staging table is purged, and no backend mutation happens.
    ///
    /// # Errors
    ///
    /// Returns `PreparedRollback` on a child and
    /// `TransactionNotStarted` outside a transaction.
    pub fn rollback(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if self.prepared {
            return Err(CoreError::PreparedRollback);
        }
        if !state.in_transaction {
            return Err(CoreError::TransactionNotStarted);
        }

        for child in state.children.values() {
            child.clear_dirty_subtree();
        }
        self.table.purge();
        tracing::debug!(tid = %self.tid, "rolled back transaction");

        state.in_transaction = false;
        state.dirty = false;
        Ok(())
    }

    /// Returns true if any prepared descendant holds unmerged writes.
    #[must_use]
    pub fn is_prepared_dirty(&self) -> bool {
        let state = self.state.lock();
        state.children.values().any(|child| child.dirty_subtree())
    }

    /// True if this handle or any descendant is dirty.
    fn dirty_subtree(&self) -> bool {
        let state = self.state.lock();
        state.dirty || state.children.values().any(|child| child.dirty_subtree())
    }

    /// Clears the dirty flag on this handle and every descendant. The
    /// caller purges the tables through the staging layer's own
    /// recursion.
    fn clear_dirty_subtree(&self) {
        let mut state = self.state.lock();
        state.dirty = false;
        for child in state.children.values() {
            child.clear_dirty_subtree();
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("tid", &self.tid)
            .field("prepared", &self.prepared)
            .field("in_transaction", &self.is_in_transaction())
            .finish_non_exhaustive()
    }
}
