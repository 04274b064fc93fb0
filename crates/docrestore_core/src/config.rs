//! Restore configuration.

use crate::error::{RestoreError, RestoreResult};
use docrestore_codec::Document;

/// Minimum number of nodes that must acknowledge a write before the restore
/// moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConcern {
    /// Number of nodes, the primary included.
    pub w: u32,
}

impl WriteConcern {
    /// Waits for `w` nodes.
    #[must_use]
    pub const fn nodes(w: u32) -> Self {
        Self { w }
    }

    /// Waits for the primary only.
    #[must_use]
    pub const fn acknowledged() -> Self {
        Self { w: 1 }
    }

    /// Returns true if writes wait for acknowledgement at all.
    #[must_use]
    pub const fn waits(&self) -> bool {
        self.w > 0
    }

    /// Returns true if the concern needs replication beyond the primary.
    #[must_use]
    pub const fn needs_replication(&self) -> bool {
        self.w > 1
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self::acknowledged()
    }
}

/// Options for one restore run.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Drop each destination collection before loading it.
    pub drop: bool,

    /// Create collections with the options recorded in sidecar metadata.
    pub restore_options: bool,

    /// Build the indexes recorded in sidecar metadata.
    pub restore_indexes: bool,

    /// Keep the index format version (`v`) from index definitions.
    pub keep_index_version: bool,

    /// Wait for this many nodes after each data write.
    pub write_concern: Option<WriteConcern>,

    /// Restore every data file into this database.
    pub db: Option<String>,

    /// Restore the single data file into this collection.
    pub collection: Option<String>,

    /// Replay `oplog.bson` from the dump root after the data restore.
    pub oplog_replay: bool,

    /// Only replay entries older than `"<seconds>[:<increment>]"`.
    pub oplog_limit: Option<String>,

    /// Only restore records matching this query.
    pub filter: Option<Document>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            drop: false,
            restore_options: true,
            restore_indexes: true,
            keep_index_version: false,
            write_concern: None,
            db: None,
            collection: None,
            oplog_replay: false,
            oplog_limit: None,
            filter: None,
        }
    }
}

impl RestoreOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets drop mode.
    #[must_use]
    pub fn drop(mut self, value: bool) -> Self {
        self.drop = value;
        self
    }

    /// Sets whether collection options are restored.
    #[must_use]
    pub fn restore_options(mut self, value: bool) -> Self {
        self.restore_options = value;
        self
    }

    /// Sets whether indexes are restored.
    #[must_use]
    pub fn restore_indexes(mut self, value: bool) -> Self {
        self.restore_indexes = value;
        self
    }

    /// Sets whether index versions are preserved.
    #[must_use]
    pub fn keep_index_version(mut self, value: bool) -> Self {
        self.keep_index_version = value;
        self
    }

    /// Sets the write concern for data writes.
    #[must_use]
    pub fn write_concern(mut self, concern: WriteConcern) -> Self {
        self.write_concern = Some(concern);
        self
    }

    /// Restores into the given database.
    #[must_use]
    pub fn db(mut self, name: impl Into<String>) -> Self {
        self.db = Some(name.into());
        self
    }

    /// Restores into the given collection.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Enables oplog replay.
    #[must_use]
    pub fn oplog_replay(mut self, value: bool) -> Self {
        self.oplog_replay = value;
        self
    }

    /// Sets the oplog replay limit.
    #[must_use]
    pub fn oplog_limit(mut self, limit: impl Into<String>) -> Self {
        self.oplog_limit = Some(limit.into());
        self
    }

    /// Sets the record filter.
    #[must_use]
    pub fn filter(mut self, query: Document) -> Self {
        self.filter = Some(query);
        self
    }

    /// Checks option combinations before anything touches the destination.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::InvalidOptions`] when a collection override is
    /// given without a database override, or an oplog limit without replay.
    pub fn validate(&self) -> RestoreResult<()> {
        if self.collection.is_some() && self.db.is_none() {
            return Err(RestoreError::invalid_options(
                "a collection name requires a database name",
            ));
        }
        if self.oplog_limit.is_some() && !self.oplog_replay {
            return Err(RestoreError::invalid_options(
                "an oplog limit requires oplog replay",
            ));
        }
        Ok(())
    }
}
