//! # docrestore testkit
//!
//! Test utilities for docrestore.
//!
//! This crate provides:
//! - Dump trees on temporary directories ([`DumpBuilder`])
//! - Builders for the documents a dump holds (users, index definitions,
//!   oplog entries)
//! - Property-based test generators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docrestore_testkit::prelude::*;
//!
//! #[test]
//! fn restores_one_collection() {
//!     let dump = DumpBuilder::new().data("app/users.bson", &numbered(3));
//!     let (dest, report) = restore_into(MemoryDestination::new(), dump.root(), RestoreOptions::default());
//!     assert_eq!(report.unwrap().records_read(), 3);
//!     assert_eq!(dest.documents("app.users").len(), 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod documents;
pub mod fixtures;
pub mod generators;

/// Re-exports of commonly used test utilities.
pub mod prelude {
    pub use crate::documents::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use docrestore_core::{
        Document, MemoryDestination, RestoreError, RestoreOptions, Timestamp, Value,
    };
}

pub use documents::*;
pub use fixtures::*;
pub use generators::*;
