//! Core type definitions for mvccdb.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Root identities are allocated from the top half of the value space so
/// they cannot collide with caller-chosen identities, which by
/// convention are small. Zero is reserved for [`TransactionId::NIL`].
const ROOT_TID_BASE: u64 = 1 << 62;

static NEXT_ROOT_TID: AtomicU64 = AtomicU64::new(ROOT_TID_BASE);

/// Opaque identity of a transaction.
///
/// A root database allocates its own identity when opened; prepared
/// children are named by the caller. Identities are compared only for
/// equality and ordering; the numeric value carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The reserved nil identity. Never names a live transaction.
    pub const NIL: Self = Self(0);

    /// Creates a transaction ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the reserved nil identity.
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Allocates a fresh identity for a root database.
    ///
    /// Identities are unique within the process, never reused, and drawn
    /// from a range disjoint from ordinary caller-chosen identities.
    #[must_use]
    pub fn next_root() -> Self {
        Self(NEXT_ROOT_TID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}
