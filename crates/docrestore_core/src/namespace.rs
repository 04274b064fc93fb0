//! Namespaces and dump file naming.
//!
//! A namespace is `<db>.<collection>`; the database part never contains a
//! dot, so the first dot splits it. Dump files map onto namespaces by their
//! parent directory (database) and their stem (collection).

use crate::error::{RestoreError, RestoreResult};
use std::fmt;
use std::path::Path;

/// Suffixes that mark a file as record data.
pub const DATA_SUFFIXES: [&str; 2] = [".bson", ".bin"];

/// Suffix of collection metadata sidecars.
pub const METADATA_SUFFIX: &str = ".metadata.json";

/// Operation log file, only meaningful at the dump root.
pub const OPLOG_FILE: &str = "oplog.bson";

/// Dumped index definitions, restored after the rest of their directory.
pub const INDEX_FILE: &str = "system.indexes.bson";

/// Profiler data, never restored.
pub const PROFILE_FILE: &str = "system.profile.bson";

/// Collection holding privilege documents.
pub const PRIVILEGE_COLLECTION: &str = "system.users";

/// Field that identifies a privilege document.
pub const PRIVILEGE_ID_FIELD: &str = "user";

/// Collection that receives index definitions.
pub const INDEX_COLLECTION: &str = "system.indexes";

/// Collection listing a database's namespaces and their options.
pub const NAMESPACES_COLLECTION: &str = "system.namespaces";

/// Database used when a data file has no parent directory name.
pub const DEFAULT_DB: &str = "test";

/// Database used for the final acknowledgement without a database override.
pub const ADMIN_DB: &str = "admin";

/// Sharding metadata database. A full restore of it through a router is refused.
pub const CONFIG_DB: &str = "config";

/// The destination's operation log.
pub const OPLOG_NAMESPACE: &str = "local.oplog.rs";

/// A `<db>.<collection>` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// Database name.
    pub db: String,
    /// Collection name, may itself contain dots.
    pub coll: String,
}

impl Namespace {
    /// Creates a namespace.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Splits a full namespace at its first dot.
    ///
    /// Returns `None` if there is no dot or either side is empty.
    #[must_use]
    pub fn parse(full: &str) -> Option<Self> {
        let (db, coll) = full.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self::new(db, coll))
    }

    /// Returns `<db>.<coll>`.
    #[must_use]
    pub fn full(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }

    /// Returns the sibling namespace `<db>.<coll>` in the same database.
    #[must_use]
    pub fn sibling(&self, coll: &str) -> Self {
        Self::new(self.db.clone(), coll)
    }

    /// Returns true for `system.*` collections.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }

    /// Returns true for the privilege collection.
    #[must_use]
    pub fn is_privilege_collection(&self) -> bool {
        self.coll == PRIVILEGE_COLLECTION
    }

    /// Returns true for the index definition collection.
    #[must_use]
    pub fn is_index_collection(&self) -> bool {
        self.coll == INDEX_COLLECTION
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Returns the database part of a full namespace string.
#[must_use]
pub fn db_of(full: &str) -> &str {
    full.split_once('.').map_or(full, |(db, _)| db)
}

/// How records of a unit are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceContext {
    /// Records are documents for this namespace.
    DataUnit(Namespace),
    /// Records are operation log entries carrying their own namespaces.
    LogReplayUnit,
}

impl NamespaceContext {
    /// Returns the namespace of a data unit.
    #[must_use]
    pub fn namespace(&self) -> Option<&Namespace> {
        match self {
            Self::DataUnit(ns) => Some(ns),
            Self::LogReplayUnit => None,
        }
    }
}

/// Returns true if the file name carries a data suffix.
#[must_use]
pub fn has_data_suffix(name: &str) -> bool {
    DATA_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Resolves the destination namespace of a data file.
///
/// The database is `db_override`, else the name of the file's parent
/// directory, else [`DEFAULT_DB`]. The collection is `coll_override`, else
/// the file name without its final extension.
///
/// # Errors
///
/// Returns [`RestoreError::EmptyNamespace`] if the database name is empty.
pub fn resolve_namespace(
    path: &Path,
    db_override: Option<&str>,
    coll_override: Option<&str>,
) -> RestoreResult<Namespace> {
    let db = match db_override {
        Some(db) => db.to_string(),
        None => path
            .parent()
            .and_then(Path::file_name)
            .map_or_else(|| DEFAULT_DB.to_string(), |n| n.to_string_lossy().into_owned()),
    };
    if db.is_empty() {
        return Err(RestoreError::EmptyNamespace {
            path: path.to_path_buf(),
        });
    }

    let coll = match coll_override {
        Some(coll) => coll.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    Ok(Namespace::new(db, coll))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_first_dot() {
        let ns = Namespace::parse("app.system.users").unwrap();
        assert_eq!(ns.db, "app");
        assert_eq!(ns.coll, "system.users");
        assert!(ns.is_privilege_collection());
        assert!(ns.is_system());

        assert!(Namespace::parse("nodot").is_none());
        assert!(Namespace::parse(".coll").is_none());
        assert!(Namespace::parse("db.").is_none());
    }

    #[test]
    fn db_of_full_names() {
        assert_eq!(db_of("app.users"), "app");
        assert_eq!(db_of("app.system.indexes"), "app");
        assert_eq!(db_of("admin"), "admin");
        assert_eq!(db_of(""), "");
    }

    #[test]
    fn resolve_from_directory_and_stem() {
        let ns = resolve_namespace(Path::new("dump/foo/bar.bson"), None, None).unwrap();
        assert_eq!(ns.full(), "foo.bar");

        let ns = resolve_namespace(Path::new("dump/foo/system.indexes.bson"), None, None).unwrap();
        assert_eq!(ns.full(), "foo.system.indexes");
        assert!(ns.is_index_collection());
    }

    #[test]
    fn resolve_with_overrides() {
        let path = Path::new("dump/foo/bar.bson");
        assert_eq!(
            resolve_namespace(path, Some("other"), None).unwrap().full(),
            "other.bar"
        );
        assert_eq!(
            resolve_namespace(path, Some("other"), Some("renamed")).unwrap().full(),
            "other.renamed"
        );
    }

    #[test]
    fn resolve_without_parent_uses_default_db() {
        let ns = resolve_namespace(Path::new("bar.bson"), None, None).unwrap();
        assert_eq!(ns.full(), "test.bar");
    }

    #[test]
    fn resolve_rejects_empty_db() {
        let err = resolve_namespace(Path::new("dump/foo/bar.bson"), Some(""), None).unwrap_err();
        assert!(matches!(err, RestoreError::EmptyNamespace { .. }));
    }

    #[test]
    fn data_suffixes() {
        assert!(has_data_suffix("users.bson"));
        assert!(has_data_suffix("users.bin"));
        assert!(!has_data_suffix("users.metadata.json"));
        assert!(!has_data_suffix("README"));
    }
}
