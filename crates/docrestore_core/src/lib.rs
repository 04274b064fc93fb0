//! # docrestore core
//!
//! Restore engine for directory dumps.
//!
//! This crate provides:
//! - Dump tree walking with single-database and single-collection layouts
//! - Namespace resolution and sidecar metadata parsing
//! - The per-collection restore pipeline (drop or snapshot, create, load,
//!   indexes, privilege reconciliation)
//! - Bounded operation log replay
//! - The [`Destination`] client seam and an in-memory destination
//!
//! ## Usage
//!
//! ```no_run
//! use docrestore_core::{MemoryDestination, RestoreOptions, Restorer};
//! use std::path::Path;
//!
//! let mut destination = MemoryDestination::new();
//! let options = RestoreOptions::new().drop(true).oplog_replay(true);
//! let report = Restorer::new(&mut destination, options)?.run(Path::new("dump"))?;
//! for unit in &report.units {
//!     println!("{}: {} records", unit.namespace, unit.counters.read);
//! }
//! # Ok::<(), docrestore_core::RestoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod dispatch;
mod error;
mod index;
mod matcher;
mod memory;
mod metadata;
mod namespace;
mod oplog;
mod records;
mod restore;
mod walker;

pub use client::{
    command_error, command_succeeded, AckError, ClientError, ClientResult, Destination, Query,
    DUPLICATE_KEY_CODE, NO_REPLICATION_CODE, NO_REPLICATION_MESSAGE,
};
pub use config::{RestoreOptions, WriteConcern};
pub use dispatch::{
    Dispatcher, Disposition, PrivilegeRetentionSet, UnitContext, UnitCounters,
};
pub use error::{RestoreError, RestoreResult};
pub use index::{create_index, rewrite_definition};
pub use matcher::{values_equal, Matcher};
pub use memory::{MemoryDestination, DEFAULT_SERVER_VERSION};
pub use metadata::{json_to_value, load_metadata, metadata_path, parse_metadata, CollectionMetadata};
pub use namespace::{
    db_of, has_data_suffix, resolve_namespace, Namespace, NamespaceContext, ADMIN_DB,
    CONFIG_DB, DATA_SUFFIXES, DEFAULT_DB, INDEX_COLLECTION, INDEX_FILE, METADATA_SUFFIX,
    NAMESPACES_COLLECTION, OPLOG_FILE, OPLOG_NAMESPACE, PRIVILEGE_COLLECTION,
    PRIVILEGE_ID_FIELD, PROFILE_FILE,
};
pub use oplog::{
    latest_oplog_timestamp, parse_oplog_limit, server_version, OplogReplayLimit, OplogReplayer,
    ReplayCounters, ServerVersion, MIN_REPLAY_VERSION,
};
pub use records::{RecordReader, RecordWriter};
pub use restore::{options_equivalent, plan, RestoreReport, Restorer, UnitReport};
pub use walker::{classify, walk, RestoreUnit, UnitKind, WalkOptions};

pub use docrestore_codec::{Document, Timestamp, Value};
