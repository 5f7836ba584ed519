//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory storage backend.
///
/// This backend stores all data in a map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use mvccdb_storage::{StorageBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// backend.put(b"k", b"v").unwrap();
/// assert_eq!(backend.get(b"k").unwrap(), b"v");
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory backend pre-populated with the given pairs.
    ///
    /// Useful for seeding test state.
    #[must_use]
    pub fn with_entries<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: RwLock::new(MemoryInner {
                entries,
                closed: false,
            }),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the backend holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Returns true if a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Returns a copy of every stored entry.
    ///
    /// Useful for asserting on whole-backend state in tests.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Vec<u8>, Vec<u8>> {
        self.inner.read().entries.clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner
            .entries
            .get(key)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn put(&self, key: &[u8], val: &[u8]) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.entries.insert(key.to_vec(), val.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.entries.remove(key);
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.write().closed = true;
        Ok(())
    }
}
