//! Error types for the restore engine.
//!
//! Every variant here is fatal: it stops the run and the process exits
//! non-zero. Write acknowledgement failures on data are not errors; they are
//! [`crate::AckError`] values that get logged while the run continues.

use crate::client::ClientError;
use docrestore_codec::CodecError;
use docrestore_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for restore operations.
pub type RestoreResult<T> = Result<T, RestoreError>;

/// Errors that abort a restore run.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// Conflicting or incomplete restore options.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// What is wrong with the options.
        message: String,
    },

    /// The dump path does not exist.
    #[error("dump path {path} does not exist")]
    DumpNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The dump tree does not fit the requested override mode.
    #[error("layout violation at {path}: {message}")]
    LayoutViolation {
        /// The offending entry.
        path: PathBuf,
        /// Why the layout is rejected.
        message: String,
    },

    /// The destination is not a primary.
    #[error("the destination is not a primary")]
    NotPrimary,

    /// A full restore holding the sharding metadata database was pointed at a
    /// router.
    #[error("cannot do a full restore on a sharded system ({path} holds the config database)")]
    ShardedFullRestore {
        /// The dump's config database directory.
        path: PathBuf,
    },

    /// A time-bounded oplog replay was combined with collection data.
    #[error(
        "the oplog limit cannot be used when the dump directory holds collection data ({path})"
    )]
    OplogLimitWithData {
        /// The first data file found.
        path: PathBuf,
    },

    /// The resolved database name is empty.
    #[error("empty database name for {path}")]
    EmptyNamespace {
        /// The data file being resolved.
        path: PathBuf,
    },

    /// A sidecar metadata file could not be parsed.
    #[error("cannot parse metadata file {path}: {message}")]
    MetadataParse {
        /// The sidecar file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// A query document (restore filter or replay matcher) is malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Why the query is rejected.
        message: String,
    },

    /// The destination rejected an index definition.
    #[error("error creating index {ns}: {message}")]
    IndexCreation {
        /// Namespace the index was being built on.
        ns: String,
        /// Server error code, if any.
        code: Option<i64>,
        /// Server error message.
        message: String,
    },

    /// Operation log replay cannot proceed.
    #[error("cannot replay oplog: {reason}")]
    ReplayIneligible {
        /// Why replay was refused.
        reason: String,
    },

    /// A command required by the restore failed on the destination.
    #[error("{command} command failed on database {db}: {message}")]
    CommandFailed {
        /// Database the command ran against.
        db: String,
        /// Command name.
        command: String,
        /// Server error message.
        message: String,
    },

    /// A dump file holds a malformed record.
    #[error("bad record in {path}: {source}")]
    Record {
        /// The dump file.
        path: PathBuf,
        /// The decode error.
        source: CodecError,
    },

    /// The destination client failed.
    #[error("destination error: {0}")]
    Client(#[from] ClientError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RestoreError {
    /// Creates an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates a layout violation error.
    pub fn layout_violation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LayoutViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a metadata parse error.
    pub fn metadata_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MetadataParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a replay ineligible error.
    pub fn replay_ineligible(reason: impl Into<String>) -> Self {
        Self::ReplayIneligible {
            reason: reason.into(),
        }
    }

    /// Creates a record decode error.
    pub fn record(path: impl Into<PathBuf>, source: CodecError) -> Self {
        Self::Record {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = RestoreError::layout_violation("dump/app", "nested directory");
        assert_eq!(
            err.to_string(),
            "layout violation at dump/app: nested directory"
        );

        let err = RestoreError::replay_ineligible("no oplog file");
        assert_eq!(err.to_string(), "cannot replay oplog: no oplog file");

        let err = RestoreError::IndexCreation {
            ns: "app.users".into(),
            code: Some(85),
            message: "index exists with different options".into(),
        };
        assert!(err.to_string().contains("app.users"));

        let err = RestoreError::ShardedFullRestore {
            path: "dump/config".into(),
        };
        assert!(err.to_string().starts_with("cannot do a full restore on a sharded system"));
    }

    #[test]
    fn record_error_keeps_codec_source() {
        let err = RestoreError::record("dump/app/users.bson", CodecError::UnexpectedEof);
        assert!(matches!(
            err,
            RestoreError::Record {
                source: CodecError::UnexpectedEof,
                ..
            }
        ));
    }
}
