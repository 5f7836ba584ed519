//! # mvccdb Testkit
//!
//! Test utilities for mvccdb.
//!
//! This crate provides:
//! - Test fixtures: in-memory and file-backed database setups
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use mvccdb_testkit::prelude::*;
//!
//! let (db, backend) = memory_db();
//! db.begin().unwrap();
//! db.put(b"k", b"v").unwrap();
//! db.commit().unwrap();
//! assert_eq!(db.get(b"k").unwrap(), b"v");
//! assert_eq!(backend.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
