//! Versioned per-key records.

use crate::types::TransactionId;

/// One record per key in a staging table.
///
/// A record is either a **default** (a read cache materialized by looking
/// through to the parent table or the backend) or **dirty** (produced by a
/// local write). The pre-image visible before the first local write is
/// captured in `old_val` and compared byte-for-byte at merge time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    key: Vec<u8>,
    /// `None` means absent (the key does not exist in this view).
    val: Option<Vec<u8>>,
    owner: TransactionId,
    deleted: bool,
    dirty: bool,
    default: bool,
    version: u64,
    old_val: Option<Vec<u8>>,
}

impl VersionedValue {
    /// Creates a default record from a read-through observation.
    ///
    /// `observed` is the value visible through the parent chain (or the
    /// backend) at first access, `None` when the key was absent.
    #[must_use]
    pub(crate) fn new_default(
        key: Vec<u8>,
        owner: TransactionId,
        observed: Option<Vec<u8>>,
    ) -> Self {
        Self {
            key,
            val: observed.clone(),
            owner,
            deleted: false,
            dirty: false,
            default: true,
            version: 0,
            old_val: observed,
        }
    }

    /// Applies a local write to this record.
    ///
    /// The first write upgrades a default record: the value at entry
    /// becomes the pre-image and the version starts at 1. Later writes
    /// mutate in place and bump the version.
    pub(crate) fn apply_write(&mut self, val: Option<Vec<u8>>, deleted: bool) {
        if self.default {
            self.default = false;
            self.old_val = self.val.take();
            self.version = 1;
        } else {
            self.version += 1;
        }
        self.val = val;
        self.deleted = deleted;
        self.dirty = true;
        debug_assert!(!self.deleted || self.val.is_none());
    }

    /// Clones this record for insertion into the parent table during a
    /// merge.
    ///
    /// The record keeps the value and tombstone flag, is re-based on the
    /// parent's prior state, and is owned by `owner`, the merging
    /// transaction, so that later siblings can identify whose write
    /// they are looking at.
    #[must_use]
    pub(crate) fn cloned_for_merge(
        &self,
        owner: TransactionId,
        parent_prior_val: Option<Vec<u8>>,
        parent_prior_version: u64,
    ) -> Self {
        Self {
            key: self.key.clone(),
            val: self.val.clone(),
            owner,
            deleted: self.deleted,
            dirty: true,
            default: false,
            version: parent_prior_version + 1,
            old_val: parent_prior_val,
        }
    }

    /// Returns the record key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the raw stored value, `None` when absent.
    #[must_use]
    pub fn val(&self) -> Option<&[u8]> {
        self.val.as_deref()
    }

    /// Returns the value this record makes visible to readers.
    ///
    /// `None` when the record is a tombstone or the key is absent.
    #[must_use]
    pub fn visible(&self) -> Option<&[u8]> {
        if self.deleted {
            None
        } else {
            self.val.as_deref()
        }
    }

    /// Returns the identity of the transaction that produced this record.
    #[must_use]
    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Returns true if this record is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns true if this record was produced by a local write.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if this record is a read-through cache entry.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.default
    }

    /// Returns the write version, 0 for defaults.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the pre-image captured before the first local write.
    #[must_use]
    pub fn old_val(&self) -> Option<&[u8]> {
        self.old_val.as_deref()
    }
}
