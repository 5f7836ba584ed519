//! The staging table: a per-transaction in-memory overlay.

use crate::error::{CoreError, CoreResult};
use crate::staging::value::VersionedValue;
use crate::types::TransactionId;
use mvccdb_storage::{StorageBackend, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a staging table reads through to on a local miss.
enum Upstream {
    /// Child tables delegate to their parent table.
    Parent(Arc<StagingTable>),
    /// The root table reads the durable backend.
    Backend(Arc<dyn StorageBackend>),
}

/// A per-transaction overlay of versioned records.
///
/// A staging table records what its transaction has observed (default
/// records, materialized by reading through to the upstream) and what it
/// has written (dirty records carrying a captured pre-image). Child
/// tables spawned with [`prepare`](StagingTable::prepare) accumulate
/// changes independently and merge them back with
/// [`merge_to_parent`](StagingTable::merge_to_parent), which is where
/// sibling conflicts are detected.
///
/// All operations take the table's own lock. No operation holds a
/// table's lock while acquiring a descendant table's lock, so the
/// child-before-parent acquisition in reads and merges cannot deadlock.
pub struct StagingTable {
    owner: TransactionId,
    upstream: Upstream,
    inner: Mutex<TableInner>,
}

#[derive(Default)]
struct TableInner {
    values: HashMap<Vec<u8>, VersionedValue>,
    /// Key insertion order; merge iterates it so conflict reports are
    /// reproducible.
    order: Vec<Vec<u8>>,
    children: HashMap<TransactionId, Arc<StagingTable>>,
}

impl StagingTable {
    /// Creates a root staging table reading through to `backend`.
    #[must_use]
    pub fn new_root(owner: TransactionId, backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            upstream: Upstream::Backend(backend),
            inner: Mutex::new(TableInner::default()),
        })
    }

    /// Returns the identity of the transaction owning this table.
    #[must_use]
    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Returns the number of records staged in this table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Returns true if no records are staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }

    /// Reads the record for `key`, materializing a default record from
    /// the upstream on first access.
    ///
    /// # Errors
    ///
    /// Propagates backend read errors verbatim; a missing key is not an
    /// error here, it materializes an absent default record.
    pub fn get(&self, key: &[u8]) -> CoreResult<VersionedValue> {
        {
            let inner = self.inner.lock();
            if let Some(value) = inner.values.get(key) {
                return Ok(value.clone());
            }
        }

        let observed = self.lookup_above(key)?;

        let mut inner = self.inner.lock();
        // Another thread may have materialized the key meanwhile.
        if let Some(value) = inner.values.get(key) {
            return Ok(value.clone());
        }
        let value = VersionedValue::new_default(key.to_vec(), self.owner, observed);
        inner.order.push(key.to_vec());
        inner.values.insert(key.to_vec(), value.clone());
        Ok(value)
    }

    /// Stages a write of `val` under `key`.
    ///
    /// # Errors
    ///
    /// Propagates backend read errors from the pre-image capture.
    pub fn put(&self, key: &[u8], val: Vec<u8>) -> CoreResult<VersionedValue> {
        self.write(key, Some(val), false)
    }

    /// Stages a tombstone under `key`.
    ///
    /// # Errors
    ///
    /// Propagates backend read errors from the pre-image capture.
    pub fn del(&self, key: &[u8]) -> CoreResult<VersionedValue> {
        self.write(key, None, true)
    }

    fn write(
        &self,
        key: &[u8],
        val: Option<Vec<u8>>,
        deleted: bool,
    ) -> CoreResult<VersionedValue> {
        {
            let mut inner = self.inner.lock();
            if let Some(record) = inner.values.get_mut(key) {
                record.apply_write(val, deleted);
                return Ok(record.clone());
            }
        }

        // First touch of this key: capture the visible value so the
        // pre-image survives into the conflict check.
        let observed = self.lookup_above(key)?;

        let mut inner = self.inner.lock();
        if let Some(record) = inner.values.get_mut(key) {
            record.apply_write(val, deleted);
            return Ok(record.clone());
        }
        let mut record = VersionedValue::new_default(key.to_vec(), self.owner, observed);
        record.apply_write(val, deleted);
        inner.order.push(key.to_vec());
        inner.values.insert(key.to_vec(), record.clone());
        Ok(record)
    }

    /// Spawns an empty child table of `table`, owned by `tid`.
    ///
    /// An associated function rather than a method because the child
    /// keeps a strong reference to its parent.
    ///
    /// # Errors
    ///
    /// Returns `TidExists` if a child is already registered under `tid`.
    pub fn prepare(table: &Arc<Self>, tid: TransactionId) -> CoreResult<Arc<StagingTable>> {
        let mut inner = table.inner.lock();
        if inner.children.contains_key(&tid) {
            return Err(CoreError::TidExists(tid));
        }
        let child = Arc::new(StagingTable {
            owner: tid,
            upstream: Upstream::Parent(Arc::clone(table)),
            inner: Mutex::new(TableInner::default()),
        });
        inner.children.insert(tid, Arc::clone(&child));
        Ok(child)
    }

    /// Merges this child table's changes into its parent.
    ///
    /// Every staged record, pure reads included, is first validated
    /// against the parent: a parent record that is dirty, owned by a
    /// transaction outside this table's ancestor chain, and whose value
    /// disagrees with the record's captured pre-image fails the merge
    /// with `ConflictWithSibling` naming that owner. Checks run before
    /// any mutation, so a failed merge leaves both tables untouched.
    ///
    /// On success the dirty records are copied into the parent, re-based
    /// on the parent's prior state, and this table's entries are purged.
    /// The returned identities name sibling transactions whose dirty
    /// parent records were overwritten, each at most once, in the order
    /// first encountered.
    ///
    /// # Errors
    ///
    /// Returns `NotPrepared` on the root table and `ConflictWithSibling`
    /// when a pre-image no longer holds.
    pub fn merge_to_parent(&self) -> CoreResult<Vec<TransactionId>> {
        let Upstream::Parent(parent) = &self.upstream else {
            return Err(CoreError::NotPrepared);
        };

        let chain = self.ancestor_tids();

        // Plan under our own lock, then apply under the parent's.
        let planned: Vec<VersionedValue> = {
            let inner = self.inner.lock();
            inner
                .order
                .iter()
                .filter_map(|key| inner.values.get(key).cloned())
                .collect()
        };

        let mut parent_inner = parent.inner.lock();

        for record in &planned {
            if let Some(theirs) = parent_inner.values.get(record.key()) {
                if theirs.is_dirty()
                    && !chain.contains(&theirs.owner())
                    && theirs.val() != record.old_val()
                {
                    tracing::debug!(
                        child = %self.owner,
                        sibling = %theirs.owner(),
                        "merge aborted: pre-image invalidated by sibling"
                    );
                    return Err(CoreError::ConflictWithSibling(theirs.owner()));
                }
            }
        }

        let mut supplanted: Vec<TransactionId> = Vec::new();
        for record in &planned {
            if record.is_default() || !record.is_dirty() {
                continue;
            }

            let (prior_val, prior_version) = match parent_inner.values.get(record.key()) {
                Some(theirs) => {
                    if theirs.is_dirty() {
                        let loser = theirs.owner();
                        if loser != self.owner
                            && loser != parent.owner
                            && !supplanted.contains(&loser)
                        {
                            supplanted.push(loser);
                        }
                    }
                    (theirs.val().map(<[u8]>::to_vec), theirs.version())
                }
                // The parent never touched this key; keep the pre-image
                // we observed through it.
                None => (record.old_val().map(<[u8]>::to_vec), 0),
            };

            let merged = record.cloned_for_merge(self.owner, prior_val, prior_version);
            if parent_inner
                .values
                .insert(record.key().to_vec(), merged)
                .is_none()
            {
                parent_inner.order.push(record.key().to_vec());
            }
        }
        drop(parent_inner);

        tracing::debug!(
            child = %self.owner,
            records = planned.len(),
            supplanted = supplanted.len(),
            "merged into parent"
        );

        // The table is fresh again; its identity and children survive.
        let mut inner = self.inner.lock();
        inner.values.clear();
        inner.order.clear();

        Ok(supplanted)
    }

    /// Clears all entries of this table and, recursively, of its
    /// children. Children stay registered: resetting a prepared
    /// transaction preserves its identity.
    pub fn purge(&self) {
        let children: Vec<Arc<StagingTable>> = {
            let mut inner = self.inner.lock();
            inner.values.clear();
            inner.order.clear();
            inner.children.values().cloned().collect()
        };
        for child in children {
            child.purge();
        }
    }

    /// Drops all child registrations. Used once a root transaction has
    /// flushed, when prepared handles become invalid.
    pub(crate) fn clear_children(&self) {
        self.inner.lock().children.clear();
    }

    /// Flushes dirty records to the backend under the table's lock.
    ///
    /// Default and clean records are skipped; tombstones delete, the
    /// rest put. The first backend error aborts the flush and surfaces.
    pub(crate) fn flush_to(&self, backend: &dyn StorageBackend) -> Result<usize, StorageError> {
        let inner = self.inner.lock();
        let mut flushed = 0;
        for key in &inner.order {
            let Some(value) = inner.values.get(key) else {
                continue;
            };
            if value.is_default() || !value.is_dirty() {
                continue;
            }
            if value.is_deleted() {
                backend.delete(key)?;
            } else if let Some(val) = value.val() {
                backend.put(key, val)?;
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    /// The visible value for `key` in this table's scope: the local
    /// record if present, otherwise whatever the upstream shows.
    fn lookup_visible(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        {
            let inner = self.inner.lock();
            if let Some(value) = inner.values.get(key) {
                return Ok(value.visible().map(<[u8]>::to_vec));
            }
        }
        self.lookup_above(key)
    }

    /// The visible value for `key` above this table, without touching
    /// this table's own records.
    fn lookup_above(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match &self.upstream {
            Upstream::Parent(parent) => parent.lookup_visible(key),
            Upstream::Backend(backend) => match backend.get(key) {
                Ok(val) => Ok(Some(val)),
                Err(StorageError::KeyNotFound) => Ok(None),
                Err(err) => Err(CoreError::Storage(err)),
            },
        }
    }

    /// Owner identities of this table and every ancestor, nearest first.
    fn ancestor_tids(&self) -> Vec<TransactionId> {
        let mut chain = vec![self.owner];
        let mut current = match &self.upstream {
            Upstream::Parent(parent) => Arc::clone(parent),
            Upstream::Backend(_) => return chain,
        };
        loop {
            chain.push(current.owner);
            current = match &current.upstream {
                Upstream::Parent(parent) => Arc::clone(parent),
                Upstream::Backend(_) => return chain,
            };
        }
    }
}

impl fmt::Debug for StagingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingTable")
            .field("owner", &self.owner)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvccdb_storage::MemoryBackend;

    fn root_with(pairs: &[(&[u8], &[u8])]) -> Arc<StagingTable> {
        let backend = Arc::new(MemoryBackend::with_entries(
            pairs.iter().map(|(k, v)| (k.to_vec(), v.to_vec())),
        ));
        StagingTable::new_root(TransactionId::next_root(), backend)
    }

    #[test]
    fn get_materializes_default_from_backend() {
        let table = root_with(&[(b"k", b"v0")]);
        let value = table.get(b"k").unwrap();

        assert!(value.is_default());
        assert_eq!(value.visible(), Some(b"v0".as_slice()));
        assert_eq!(value.version(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn get_missing_materializes_absent_default() {
        let table = root_with(&[]);
        let value = table.get(b"nope").unwrap();

        assert!(value.is_default());
        assert_eq!(value.visible(), None);
        assert!(!value.is_deleted());
    }

    #[test]
    fn get_is_stable_across_backend_changes() {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(MemoryBackend::with_entries([(b"k".to_vec(), b"v0".to_vec())]));
        let table = StagingTable::new_root(TransactionId::next_root(), Arc::clone(&backend));

        assert_eq!(table.get(b"k").unwrap().visible(), Some(b"v0".as_slice()));
        backend.put(b"k", b"v9").unwrap();
        // The default record shields the table from later backend writes.
        assert_eq!(table.get(b"k").unwrap().visible(), Some(b"v0".as_slice()));
    }

    #[test]
    fn put_captures_preimage_and_versions() {
        let table = root_with(&[(b"k", b"v0")]);
        let first = table.put(b"k", b"v1".to_vec()).unwrap();
        assert_eq!(first.version(), 1);
        assert_eq!(first.old_val(), Some(b"v0".as_slice()));

        let second = table.put(b"k", b"v2".to_vec()).unwrap();
        assert_eq!(second.version(), 2);
        assert_eq!(second.old_val(), Some(b"v0".as_slice()));
    }

    #[test]
    fn del_stages_tombstone() {
        let table = root_with(&[(b"k", b"v0")]);
        let value = table.del(b"k").unwrap();
        assert!(value.is_deleted());
        assert!(value.is_dirty());
        assert_eq!(value.visible(), None);
    }

    #[test]
    fn child_reads_through_parent() {
        let table = root_with(&[(b"k", b"v0")]);
        table.put(b"staged", b"s".to_vec()).unwrap();

        let child = StagingTable::prepare(&table, TransactionId::new(100)).unwrap();
        assert_eq!(child.get(b"k").unwrap().visible(), Some(b"v0".as_slice()));
        assert_eq!(
            child.get(b"staged").unwrap().visible(),
            Some(b"s".as_slice())
        );
    }

    #[test]
    fn child_read_does_not_materialize_in_parent() {
        let table = root_with(&[(b"k", b"v0")]);
        let child = StagingTable::prepare(&table, TransactionId::new(100)).unwrap();

        child.get(b"k").unwrap();
        assert_eq!(child.len(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn child_write_shadows_parent() {
        let table = root_with(&[(b"k", b"v0")]);
        let child = StagingTable::prepare(&table, TransactionId::new(100)).unwrap();

        child.put(b"k", b"child".to_vec()).unwrap();
        assert_eq!(
            child.get(b"k").unwrap().visible(),
            Some(b"child".as_slice())
        );
        // The parent still sees the backend value.
        assert_eq!(table.get(b"k").unwrap().visible(), Some(b"v0".as_slice()));
    }

    #[test]
    fn prepare_duplicate_tid_fails() {
        let table = root_with(&[]);
        let tid = TransactionId::new(100);
        StagingTable::prepare(&table, tid).unwrap();
        assert!(matches!(
            StagingTable::prepare(&table, tid),
            Err(CoreError::TidExists(t)) if t == tid
        ));
    }

    #[test]
    fn merge_on_root_fails() {
        let table = root_with(&[]);
        assert!(matches!(
            table.merge_to_parent(),
            Err(CoreError::NotPrepared)
        ));
    }

    #[test]
    fn merge_copies_dirty_records() {
        let table = root_with(&[]);
        let child = StagingTable::prepare(&table, TransactionId::new(100)).unwrap();

        child.put(b"a", b"1".to_vec()).unwrap();
        child.del(b"b").unwrap();
        child.get(b"read-only").unwrap();

        let supplanted = child.merge_to_parent().unwrap();
        assert!(supplanted.is_empty());

        // Dirty records landed; the pure read did not.
        assert_eq!(table.len(), 2);
        let merged = table.get(b"a").unwrap();
        assert_eq!(merged.visible(), Some(b"1".as_slice()));
        assert!(merged.is_dirty());
        assert_eq!(merged.owner(), TransactionId::new(100));
        assert_eq!(merged.version(), 1);

        // The child is fresh again.
        assert!(child.is_empty());
    }

    #[test]
    fn merge_conflict_names_sibling_and_mutates_nothing() {
        let table = root_with(&[(b"k", b"v0")]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        let c2 = StagingTable::prepare(&table, TransactionId::new(2)).unwrap();

        c1.put(b"k", b"v1".to_vec()).unwrap();
        c2.put(b"k", b"v2".to_vec()).unwrap();

        assert!(c1.merge_to_parent().unwrap().is_empty());

        let before = table.get(b"k").unwrap();
        let err = c2.merge_to_parent().unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConflictWithSibling(t) if t == TransactionId::new(1)
        ));

        // Failed merge left the parent untouched and the child intact.
        assert_eq!(table.get(b"k").unwrap(), before);
        assert_eq!(c2.get(b"k").unwrap().visible(), Some(b"v2".as_slice()));
    }

    #[test]
    fn merge_pure_read_detects_phantom() {
        let table = root_with(&[(b"k", b"v0")]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        let c2 = StagingTable::prepare(&table, TransactionId::new(2)).unwrap();

        // c2 only reads k; c1 rewrites it and merges first.
        c2.get(b"k").unwrap();
        c2.put(b"other", b"x".to_vec()).unwrap();
        c1.put(b"k", b"v1".to_vec()).unwrap();
        assert!(c1.merge_to_parent().unwrap().is_empty());

        let err = c2.merge_to_parent().unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConflictWithSibling(t) if t == TransactionId::new(1)
        ));
    }

    #[test]
    fn merge_after_reread_succeeds_and_reports_supplanted() {
        let table = root_with(&[(b"k", b"v0")]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();

        c1.put(b"k", b"v1".to_vec()).unwrap();
        assert!(c1.merge_to_parent().unwrap().is_empty());

        // A later sibling reads the merged value before overwriting it.
        let c3 = StagingTable::prepare(&table, TransactionId::new(3)).unwrap();
        assert_eq!(c3.get(b"k").unwrap().visible(), Some(b"v1".as_slice()));
        c3.put(b"k", b"v3".to_vec()).unwrap();

        let supplanted = c3.merge_to_parent().unwrap();
        assert_eq!(supplanted, vec![TransactionId::new(1)]);
        assert_eq!(table.get(b"k").unwrap().visible(), Some(b"v3".as_slice()));
    }

    #[test]
    fn merge_same_value_as_sibling_is_not_a_conflict() {
        let table = root_with(&[(b"k", b"v0")]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        let c2 = StagingTable::prepare(&table, TransactionId::new(2)).unwrap();

        // Both observed v0; c1 merged v0 back unchanged as an explicit write.
        c1.put(b"k", b"v0".to_vec()).unwrap();
        c2.get(b"k").unwrap();
        c2.put(b"x", b"y".to_vec()).unwrap();

        assert!(c1.merge_to_parent().unwrap().is_empty());
        // c2's pre-image still matches the merged value, so no conflict.
        assert!(c2.merge_to_parent().unwrap().is_empty());
    }

    #[test]
    fn merge_reports_each_sibling_once_in_order() {
        let table = root_with(&[]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        let c2 = StagingTable::prepare(&table, TransactionId::new(2)).unwrap();

        c1.put(b"a", b"1".to_vec()).unwrap();
        c1.put(b"b", b"1".to_vec()).unwrap();
        assert!(c1.merge_to_parent().unwrap().is_empty());

        let c3 = StagingTable::prepare(&table, TransactionId::new(3)).unwrap();
        c2.put(b"c", b"2".to_vec()).unwrap();
        assert!(c2.merge_to_parent().unwrap().is_empty());

        // c3 re-reads everything, then overwrites all three keys.
        for key in [b"a".as_slice(), b"b", b"c"] {
            c3.get(key).unwrap();
        }
        c3.put(b"a", b"3".to_vec()).unwrap();
        c3.put(b"b", b"3".to_vec()).unwrap();
        c3.put(b"c", b"3".to_vec()).unwrap();

        let supplanted = c3.merge_to_parent().unwrap();
        assert_eq!(supplanted, vec![TransactionId::new(1), TransactionId::new(2)]);
    }

    #[test]
    fn merge_tombstone_conflicts_with_observed_value() {
        let table = root_with(&[(b"k", b"v0")]);
        let c1 = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        let c2 = StagingTable::prepare(&table, TransactionId::new(2)).unwrap();

        c2.get(b"k").unwrap();
        c2.put(b"x", b"y".to_vec()).unwrap();
        c1.del(b"k").unwrap();
        assert!(c1.merge_to_parent().unwrap().is_empty());

        // c2 observed v0 but the key is now a sibling tombstone.
        assert!(matches!(
            c2.merge_to_parent(),
            Err(CoreError::ConflictWithSibling(t)) if t == TransactionId::new(1)
        ));
    }

    #[test]
    fn purge_clears_table_and_children() {
        let table = root_with(&[]);
        table.put(b"a", b"1".to_vec()).unwrap();
        let child = StagingTable::prepare(&table, TransactionId::new(1)).unwrap();
        child.put(b"b", b"2".to_vec()).unwrap();

        table.purge();

        assert!(table.is_empty());
        assert!(child.is_empty());
        // Children stay registered: the same tid is still taken.
        assert!(matches!(
            StagingTable::prepare(&table, TransactionId::new(1)),
            Err(CoreError::TidExists(_))
        ));
    }

    #[test]
    fn flush_skips_defaults_and_clean_records() {
        let backend = Arc::new(MemoryBackend::with_entries([
            (b"seed".to_vec(), b"s".to_vec()),
            (b"gone".to_vec(), b"g".to_vec()),
        ]));
        let dyn_backend: Arc<dyn StorageBackend> = backend.clone();
        let table = StagingTable::new_root(TransactionId::next_root(), dyn_backend.clone());

        table.get(b"seed").unwrap();
        table.put(b"a", b"1".to_vec()).unwrap();
        table.del(b"gone").unwrap();

        let flushed = table.flush_to(dyn_backend.as_ref()).unwrap();
        assert_eq!(flushed, 2);

        let snapshot = backend.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[b"seed".as_slice()], b"s");
        assert_eq!(snapshot[b"a".as_slice()], b"1");
        assert!(!snapshot.contains_key(b"gone".as_slice()));
    }
}
