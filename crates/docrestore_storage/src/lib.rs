//! # docrestore storage
//!
//! Byte-store backends underneath dump files.
//!
//! Backends are **opaque byte stores**: they know nothing about frames or
//! documents. The record reader in `docrestore_core` interprets the bytes.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - A dump file on disk, read-only or appendable
//! - [`InMemoryBackend`] - For tests and for staging dump content in memory
//!
//! ## Example
//!
//! ```rust
//! use docrestore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
