//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random keys, values, and
//! operation sequences that maintain required invariants.

use proptest::prelude::*;

/// Strategy for generating valid keys: non-empty, up to 64 bytes.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=64)
}

/// Strategy for generating keys from a tiny keyspace.
///
/// Collisions are the interesting case for staging and merge logic;
/// drawing from a handful of short keys makes them common.
pub fn small_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0u8..8).prop_map(|n| vec![b'k', n])
}

/// Strategy for generating values, empty values included.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=128)
}

/// One database operation for randomized sequences.
#[derive(Debug, Clone)]
pub enum DbOp {
    /// Write a value.
    Put {
        /// Operation key.
        key: Vec<u8>,
        /// Value to write.
        val: Vec<u8>,
    },
    /// Delete a key.
    Del {
        /// Operation key.
        key: Vec<u8>,
    },
    /// Read a key.
    Get {
        /// Operation key.
        key: Vec<u8>,
    },
}

impl DbOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Del { key } | Self::Get { key } => key,
        }
    }

    /// Returns true if this operation mutates state.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }
}

/// Strategy for a single operation over the tiny keyspace.
pub fn op_strategy() -> impl Strategy<Value = DbOp> {
    prop_oneof![
        (small_key_strategy(), value_strategy())
            .prop_map(|(key, val)| DbOp::Put { key, val }),
        small_key_strategy().prop_map(|key| DbOp::Del { key }),
        small_key_strategy().prop_map(|key| DbOp::Get { key }),
    ]
}

/// Strategy for a sequence of up to `max` operations.
pub fn ops_strategy(max: usize) -> impl Strategy<Value = Vec<DbOp>> {
    prop::collection::vec(op_strategy(), 0..=max)
}
