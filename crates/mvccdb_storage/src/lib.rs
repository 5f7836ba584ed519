//! # mvccdb Storage
//!
//! Storage backend trait and implementations for mvccdb.
//!
//! This crate provides the lowest-level storage abstraction for mvccdb.
//! Backends are **opaque byte key-value stores** - they do not interpret
//! the data they hold.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (get, put, delete, close)
//! - No knowledge of staging tables, transactions, or versioning
//! - Must be `Send + Sync`; one backend is shared by a whole database tree
//! - Missing keys are a dedicated sentinel, never an I/O error
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - For testing and ephemeral state
//! - [`FileBackend`] - For persistent storage via an append-only log
//!
//! ## Example
//!
//! ```rust
//! use mvccdb_storage::{StorageBackend, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.put(b"hello", b"world").unwrap();
//! assert_eq!(backend.get(b"hello").unwrap(), b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod file;
mod memory;
mod record;

pub use backend::StorageBackend;
pub use config::FileConfig;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
