//! Dump tree traversal.
//!
//! The walker turns a dump root into an ordered list of [`RestoreUnit`]s
//! before anything is written to the destination, so layout errors abort the
//! run with the destination untouched.
//!
//! Directory entries are visited in name order. Within a directory the index
//! definition file is held back until every other entry has been visited, and
//! it is dropped altogether when the directory also has metadata sidecars:
//! sidecars carry the indexes in that case.

use crate::error::{RestoreError, RestoreResult};
use crate::namespace::{has_data_suffix, INDEX_FILE, METADATA_SUFFIX, OPLOG_FILE, PROFILE_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Classification of a dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Record data for one collection.
    Data,
    /// Index definitions (`system.indexes.bson`).
    IndexData,
    /// A sidecar, read together with its data file.
    Metadata,
    /// A file the restore does not understand.
    Unknown,
    /// A file deliberately not restored.
    Skip,
}

impl UnitKind {
    /// Returns true if units of this kind are restored.
    #[must_use]
    pub fn is_restorable(self) -> bool {
        matches!(self, Self::Data | Self::IndexData)
    }
}

/// A file selected by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreUnit {
    /// Path of the file.
    pub path: PathBuf,
    /// What the file holds.
    pub kind: UnitKind,
}

/// Constraints applied while walking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// A database override is set: the root must hold files only.
    pub db_override: bool,
    /// A collection override is set: the root must hold a single file.
    pub collection_override: bool,
    /// A replay limit is set: the tree must not hold collection data.
    pub oplog_limit: bool,
}

/// Classifies a file by name.
#[must_use]
pub fn classify(path: &Path) -> UnitKind {
    let name = file_name(path);
    if name.ends_with(METADATA_SUFFIX) {
        UnitKind::Metadata
    } else if !has_data_suffix(&name) {
        UnitKind::Unknown
    } else if name == PROFILE_FILE {
        UnitKind::Skip
    } else if name == INDEX_FILE {
        UnitKind::IndexData
    } else {
        UnitKind::Data
    }
}

/// Walks a dump root.
///
/// `root` may be a single file, in which case it is the only candidate unit.
/// The returned list holds restorable units plus any skipped or unknown
/// files; metadata sidecars are never listed.
///
/// # Errors
///
/// Returns [`RestoreError::LayoutViolation`] if the tree does not fit the
/// override mode, [`RestoreError::OplogLimitWithData`] if a replay limit is
/// set and collection data is found, or an I/O error.
pub fn walk(root: &Path, options: WalkOptions) -> RestoreResult<Vec<RestoreUnit>> {
    let mut units = Vec::new();
    if root.is_dir() {
        walk_dir(root, true, options, &mut units)?;
    } else {
        visit_file(root, options, &mut units)?;
    }
    Ok(units)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn walk_dir(
    dir: &Path,
    top_level: bool,
    options: WalkOptions,
    units: &mut Vec<RestoreUnit>,
) -> RestoreResult<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    entries.retain(|path| {
        let hidden = file_name(path).starts_with('.');
        if hidden {
            debug!(path = %path.display(), "skipping hidden entry");
        }
        !hidden
    });

    let mut index_file = None;
    let mut has_metadata = false;

    for (position, path) in entries.iter().enumerate() {
        let is_dir = path.is_dir();

        if options.db_override && is_dir {
            return Err(RestoreError::layout_violation(
                path,
                "with a database name the dump path must hold files only",
            ));
        }
        if options.collection_override && (is_dir || position > 0) {
            return Err(RestoreError::layout_violation(
                path,
                "with a collection name the dump path must hold exactly one file",
            ));
        }

        if is_dir {
            walk_dir(path, false, options, units)?;
            continue;
        }

        let name = file_name(path);
        if top_level && !options.db_override && name == OPLOG_FILE {
            continue;
        }
        if name == INDEX_FILE {
            index_file = Some(path);
            continue;
        }
        if name.ends_with(METADATA_SUFFIX) {
            has_metadata = true;
        }
        visit_file(path, options, units)?;
    }

    if let Some(path) = index_file {
        if has_metadata {
            debug!(
                path = %path.display(),
                "skipping index file, metadata files hold the indexes"
            );
        } else {
            visit_file(path, options, units)?;
        }
    }

    Ok(())
}

fn visit_file(
    path: &Path,
    options: WalkOptions,
    units: &mut Vec<RestoreUnit>,
) -> RestoreResult<()> {
    let kind = classify(path);
    match kind {
        UnitKind::Metadata => return Ok(()),
        UnitKind::Unknown => {
            warn!(path = %path.display(), "don't know what to do with file, skipping");
        }
        UnitKind::Skip => {
            info!(path = %path.display(), "skipping");
        }
        UnitKind::Data | UnitKind::IndexData => {
            if options.oplog_limit {
                return Err(RestoreError::OplogLimitWithData {
                    path: path.to_path_buf(),
                });
            }
        }
    }
    units.push(RestoreUnit {
        path: path.to_path_buf(),
        kind,
    });
    Ok(())
}
