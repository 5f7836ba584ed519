//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::config::FileConfig;
use crate::error::{StorageError, StorageResult};
use crate::record::{decode_record, encode_record, LogRecord, HEADER_SIZE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// Data is kept as an append-only log of put/delete records. On open the
/// log is replayed into an in-memory index, so reads never touch the
/// disk; writes append a record and update the index.
///
/// # Durability
///
/// - Every append goes through `File::write_all`
/// - With [`FileConfig::sync_on_write`] each append is also fsynced
/// - `close()` flushes and calls `File::sync_all()`
///
/// A torn record at the tail of the log (crash mid-append) is detected
/// by its declared lengths running past the end of the file; the log is
/// truncated to the last valid boundary instead of failing the open.
/// A complete record with a bad CRC is corruption and fails the open.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```no_run
/// use mvccdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("state.mlog")).unwrap();
/// backend.put(b"k", b"v").unwrap();
/// backend.close().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    config: FileConfig,
    inner: RwLock<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    file: File,
    index: HashMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist and `create_if_missing` is disabled
    /// - The log contains a corrupt record before its final one
    /// - An I/O error occurs
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, FileConfig::default())
    }

    /// Opens or creates a file backend with custom configuration.
    ///
    /// # Errors
    ///
    /// See [`FileBackend::open`].
    pub fn open_with_config(path: &Path, config: FileConfig) -> StorageResult<Self> {
        if !config.create_if_missing && !path.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("log file {} does not exist", path.display()),
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create_if_missing)
            .truncate(false)
            .open(path)?;

        let (index, valid_len) = replay(&mut file)?;

        // Drop a torn tail left by a crash mid-append.
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
            inner: RwLock::new(FileInner {
                file,
                index,
                closed: false,
            }),
        })
    }

    /// Returns the path to the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Returns true if the backend holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Rewrites the log keeping only live entries.
    ///
    /// The compacted log is written to a temporary file next to the
    /// current one and atomically renamed over it, so a crash during
    /// compaction leaves the old log intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        for (key, val) in &inner.index {
            let data = encode_record(&LogRecord::Put {
                key: key.clone(),
                val: val.clone(),
            });
            tmp.write_all(&data)?;
        }
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        inner.file = tmp;
        Ok(())
    }

    fn append_record(&self, record: &LogRecord) -> StorageResult<()> {
        let data = encode_record(record);
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }

        inner.file.write_all(&data)?;
        if self.config.sync_on_write {
            inner.file.sync_data()?;
        }

        match record {
            LogRecord::Put { key, val } => {
                inner.index.insert(key.clone(), val.clone());
            }
            LogRecord::Delete { key } => {
                inner.index.remove(key);
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner
            .index
            .get(key)
            .cloned()
            .ok_or(StorageError::KeyNotFound)
    }

    fn put(&self, key: &[u8], val: &[u8]) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        self.append_record(&LogRecord::Put {
            key: key.to_vec(),
            val: val.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        {
            let inner = self.inner.read();
            if inner.closed {
                return Err(StorageError::Closed);
            }
            // Skip the tombstone when the key was never written.
            if !inner.index.contains_key(key) {
                return Ok(());
            }
        }
        self.append_record(&LogRecord::Delete { key: key.to_vec() })
    }

    fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        inner.file.flush()?;
        inner.file.sync_all()?;
        inner.closed = true;
        Ok(())
    }
}

/// Replays the log, returning the index and the offset of the last
/// valid record boundary.
fn replay(file: &mut File) -> StorageResult<(HashMap<Vec<u8>, Vec<u8>>, u64)> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;

    let mut index = HashMap::new();
    let mut offset = 0usize;

    while offset < data.len() {
        match decode_record(&data[offset..]) {
            Ok((record, consumed)) => {
                match record {
                    LogRecord::Put { key, val } => {
                        index.insert(key, val);
                    }
                    LogRecord::Delete { key } => {
                        index.remove(&key);
                    }
                }
                offset += consumed;
            }
            Err(err) => {
                // Torn tail: everything before it replayed cleanly.
                if is_truncated_tail(&data[offset..]) {
                    break;
                }
                return Err(err);
            }
        }
    }

    Ok((index, offset as u64))
}

/// A record whose declared lengths run past the end of the buffer is a
/// truncated tail rather than mid-log corruption.
fn is_truncated_tail(remaining: &[u8]) -> bool {
    if remaining.len() < HEADER_SIZE {
        return true;
    }
    let key_len = u32::from_le_bytes([remaining[7], remaining[8], remaining[9], remaining[10]]);
    let val_len = u32::from_le_bytes([remaining[11], remaining[12], remaining[13], remaining[14]]);
    let total = HEADER_SIZE + key_len as usize + val_len as usize + 4;
    total > remaining.len()
}
