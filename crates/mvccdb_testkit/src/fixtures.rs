//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use mvccdb_core::Database;
use mvccdb_storage::{FileBackend, MemoryBackend, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Opens a root database over a fresh in-memory backend.
///
/// Returns the backend alongside so tests can assert on durable state
/// directly.
#[must_use]
pub fn memory_db() -> (Arc<Database>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let db = Database::open(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    (db, backend)
}

/// Opens a root database over an in-memory backend seeded with `pairs`.
#[must_use]
pub fn seeded_db<I, K, V>(pairs: I) -> (Arc<Database>, Arc<MemoryBackend>)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Vec<u8>>,
    V: Into<Vec<u8>>,
{
    let backend = Arc::new(MemoryBackend::with_entries(pairs));
    let db = Database::open(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    (db, backend)
}

/// A file-backed database rooted in a temporary directory.
///
/// The directory lives as long as this fixture.
pub struct TempFileDb {
    /// The database handle.
    pub db: Arc<Database>,
    /// Path of the backing log file.
    pub path: PathBuf,
    _temp_dir: TempDir,
}

/// Opens a root database over a file backend in a fresh temp directory.
#[must_use]
pub fn file_db() -> TempFileDb {
    let temp_dir = TempDir::new().expect("failed to create temp directory");
    let path = temp_dir.path().join("state.mlog");
    let backend = FileBackend::open(&path).expect("failed to open file backend");
    let db = Database::open(Arc::new(backend) as Arc<dyn StorageBackend>);
    TempFileDb {
        db,
        path,
        _temp_dir: temp_dir,
    }
}
