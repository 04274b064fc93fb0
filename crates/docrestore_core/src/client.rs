//! The destination database client.
//!
//! [`Destination`] is the seam between the restore engine and the server it
//! writes to. Writes are fire-and-forget; their outcome is read back with
//! [`Destination::get_last_error`] when a write concern is configured.

use crate::config::WriteConcern;
use docrestore_codec::{Document, Value};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Transport-level client failures.
///
/// Unlike [`AckError`], these are fatal for a restore run.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The connection failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// A namespace string is malformed.
    #[error("invalid namespace: {ns:?}")]
    InvalidNamespace {
        /// The namespace.
        ns: String,
    },

    /// The server sent a reply the client cannot interpret.
    #[error("protocol error: {message}")]
    Protocol {
        /// Error description.
        message: String,
    },
}

impl ClientError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid namespace error.
    pub fn invalid_namespace(ns: impl Into<String>) -> Self {
        Self::InvalidNamespace { ns: ns.into() }
    }
}

/// Error code reported when a duplicate key is rejected by a unique index.
pub const DUPLICATE_KEY_CODE: i64 = 11000;

/// Error code reported when replication is requested of a server that is not
/// part of a replica set.
pub const NO_REPLICATION_CODE: i64 = 2;

/// Message of the "not replicated" acknowledgement error.
pub const NO_REPLICATION_MESSAGE: &str = "norepl";

/// An acknowledged write that the server reports as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AckError {
    /// Server error code, if any.
    pub code: Option<i64>,
    /// Server error message.
    pub message: String,
}

impl AckError {
    /// Creates an acknowledgement error.
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error a standalone server reports for a replicated write concern.
    #[must_use]
    pub fn no_replication() -> Self {
        Self::new(Some(NO_REPLICATION_CODE), NO_REPLICATION_MESSAGE)
    }

    /// Returns true for the "not replicated" condition.
    #[must_use]
    pub fn is_no_replication(&self) -> bool {
        self.message == NO_REPLICATION_MESSAGE
    }

    /// Returns true for duplicate key errors.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        self.code == Some(DUPLICATE_KEY_CODE)
    }
}

/// A find request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Records must match this query document.
    pub filter: Document,
    /// Fields to keep in results; all fields if `None`.
    pub projection: Option<Vec<String>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Return records in reverse insertion order.
    pub newest_first: bool,
}

impl Query {
    /// Creates a query with the given filter.
    #[must_use]
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Keeps only the named fields.
    #[must_use]
    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = Some(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Walks the collection from its newest record.
    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }
}

/// A database server that receives restored data.
///
/// Implementations apply each call in order. Write calls (`insert`,
/// `update`, `remove`) do not report server-side failures; callers fetch them
/// with [`get_last_error`](Destination::get_last_error).
pub trait Destination {
    /// Inserts a document into a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn insert(&mut self, ns: &str, doc: Document) -> ClientResult<()>;

    /// Replaces the first document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn update(&mut self, ns: &str, query: &Document, doc: Document) -> ClientResult<()>;

    /// Removes every document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn remove(&mut self, ns: &str, query: &Document) -> ClientResult<()>;

    /// Finds documents in a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn query(&mut self, ns: &str, query: &Query) -> ClientResult<Vec<Document>>;

    /// Runs a command against a database and returns the server's reply.
    ///
    /// A reply whose `ok` field is not truthy reports a failed command; see
    /// [`command_succeeded`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn run_command(&mut self, db: &str, command: Document) -> ClientResult<Document>;

    /// Drops a collection. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn drop_collection(&mut self, ns: &str) -> ClientResult<bool>;

    /// Waits for the previous write on this connection to satisfy the write
    /// concern and returns its error, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn get_last_error(
        &mut self,
        db: &str,
        write_concern: &WriteConcern,
    ) -> ClientResult<Option<AckError>>;

    /// Returns true if the server accepts writes as a primary.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    fn is_master(&mut self) -> ClientResult<bool>;

    /// Returns true if the connection goes through a sharding router.
    fn is_router_process(&self) -> bool;
}

/// Returns true if a command reply reports success.
#[must_use]
pub fn command_succeeded(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Value::Bool(ok)) => *ok,
        Some(Value::Integer(n)) => *n == 1,
        Some(Value::Float(n)) => (*n - 1.0).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Returns the error message of a failed command reply.
#[must_use]
pub fn command_error(reply: &Document) -> String {
    reply
        .get_str("errmsg")
        .map_or_else(|| "unknown error".to_string(), str::to_string)
}
