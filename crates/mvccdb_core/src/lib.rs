//! # mvccdb Core
//!
//! A multi-version, transactional key-value overlay on top of an opaque
//! durable backend.
//!
//! This crate provides:
//! - Direct passthrough access to the backend
//! - Flat transactions with commit/rollback, buffered in a staging table
//! - Prepared child transactions that execute concurrently against
//!   shared state and merge back after exact, deterministic conflict
//!   detection
//!
//! The staging layer records a versioned record per touched key,
//! including the pre-image visible at first access, so that merging a
//! child back into its parent can verify, byte for byte, that no sibling
//! invalidated what the child observed. First committer wins; the loser
//! learns exactly which sibling it lost to and can be reset and
//! re-executed.
//!
//! ## Example
//!
//! ```rust
//! use mvccdb_core::{CoreError, Database, TransactionId};
//! use mvccdb_storage::MemoryBackend;
//! use std::sync::Arc;
//!
//! let db = Database::open(Arc::new(MemoryBackend::new()));
//! db.begin().unwrap();
//!
//! let t1 = db.prepare(TransactionId::new(1)).unwrap();
//! let t2 = db.prepare(TransactionId::new(2)).unwrap();
//! t1.put(b"x", b"1").unwrap();
//! t2.put(b"y", b"2").unwrap();
//!
//! // Disjoint key sets: both merges succeed.
//! assert!(t1.check_and_update().unwrap().is_empty());
//! assert!(t2.check_and_update().unwrap().is_empty());
//! db.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod error;
mod staging;
mod types;

pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use staging::{StagingTable, VersionedValue};
pub use types::TransactionId;
