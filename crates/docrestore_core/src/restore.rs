//! The restore orchestrator.
//!
//! A run walks the dump, restores each unit through a fixed pipeline and then
//! replays the oplog if asked to:
//!
//! ```text
//! Init -> DropOrSnapshot -> CreateCollection -> Load -> PostIndexes -> Reconcile -> Done
//! ```
//!
//! Every check that can reject the run (option validation, destination role,
//! replay eligibility, dump layout) happens before the first destination
//! write.

use crate::client::{command_error, command_succeeded, Destination, Query};
use crate::config::{RestoreOptions, WriteConcern};
use crate::dispatch::{Dispatcher, PrivilegeRetentionSet, UnitContext, UnitCounters};
use crate::error::{RestoreError, RestoreResult};
use crate::index::create_index;
use crate::matcher::{values_equal, Matcher};
use crate::metadata::{load_metadata, CollectionMetadata};
use crate::namespace::{
    resolve_namespace, Namespace, ADMIN_DB, CONFIG_DB, NAMESPACES_COLLECTION,
    PRIVILEGE_ID_FIELD,
};
use crate::oplog::{OplogReplayer, ReplayCounters};
use crate::records::RecordReader;
use crate::walker::{walk, RestoreUnit, UnitKind, WalkOptions};
use docrestore_codec::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one restored unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// The dump file.
    pub path: PathBuf,
    /// Destination namespace.
    pub namespace: Namespace,
    /// Data or index definitions.
    pub kind: UnitKind,
    /// What happened to the records.
    pub counters: UnitCounters,
    /// Privilege documents removed because the dump did not hold them.
    pub privileges_removed: u64,
}

/// Outcome of a restore run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Restored units in walk order.
    pub units: Vec<UnitReport>,
    /// Files the walk listed but the restore did not load.
    pub ignored: Vec<RestoreUnit>,
    /// Replay outcome, if the oplog was replayed.
    pub replay: Option<ReplayCounters>,
}

impl RestoreReport {
    /// Records read from all data files.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.units.iter().map(|u| u.counters.read).sum()
    }

    /// Indexes created across all units.
    #[must_use]
    pub fn indexes_created(&self) -> u64 {
        self.units.iter().map(|u| u.counters.indexes).sum()
    }
}

/// Lists the units a restore with these options would process.
///
/// # Errors
///
/// Returns an error if the options are invalid, the root does not exist, or
/// the walk rejects the layout.
pub fn plan(root: &Path, options: &RestoreOptions) -> RestoreResult<Vec<RestoreUnit>> {
    options.validate()?;
    if !root.exists() {
        return Err(RestoreError::DumpNotFound {
            path: root.to_path_buf(),
        });
    }
    walk(
        root,
        WalkOptions {
            db_override: options.db.is_some(),
            collection_override: options.collection.is_some(),
            oplog_limit: options.oplog_limit.is_some(),
        },
    )
}

/// Returns true if two creation option sets are equivalent.
///
/// `create` fields are ignored on both sides; every other field must be
/// present on both sides with equal values.
#[must_use]
pub fn options_equivalent(requested: &Document, existing: &Document) -> bool {
    let requested_count = requested.keys().filter(|k| *k != "create").count();
    let mut existing_count = 0;
    for (key, value) in existing.iter() {
        if key == "create" {
            continue;
        }
        existing_count += 1;
        match requested.get(key) {
            Some(other) if values_equal(other, value) => {}
            _ => return false,
        }
    }
    requested_count == existing_count
}

/// Restores dumps into a destination.
///
/// # Example
///
/// ```no_run
/// use docrestore_core::{MemoryDestination, RestoreOptions, Restorer};
/// use std::path::Path;
///
/// let mut destination = MemoryDestination::new();
/// let options = RestoreOptions::new().drop(true);
/// let report = Restorer::new(&mut destination, options)
///     .unwrap()
///     .run(Path::new("dump"))
///     .unwrap();
/// println!("{} records", report.records_read());
/// ```
pub struct Restorer<'a, D: Destination + ?Sized> {
    client: &'a mut D,
    options: RestoreOptions,
    filter: Option<Matcher>,
}

impl<'a, D: Destination + ?Sized> Restorer<'a, D> {
    /// Creates a restorer.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the filter cannot be
    /// compiled.
    pub fn new(client: &'a mut D, options: RestoreOptions) -> RestoreResult<Self> {
        options.validate()?;
        let filter = options.filter.as_ref().map(Matcher::new).transpose()?;
        Ok(Self {
            client,
            options,
            filter,
        })
    }

    /// The options of this restorer.
    #[must_use]
    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Restores the dump at `root`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; units restored before it stay restored.
    pub fn run(&mut self, root: &Path) -> RestoreResult<RestoreReport> {
        if !root.exists() {
            return Err(RestoreError::DumpNotFound {
                path: root.to_path_buf(),
            });
        }

        self.check_destination(root)?;

        let replayer = if self.options.oplog_replay {
            Some(OplogReplayer::prepare(
                &mut *self.client,
                root,
                &self.options,
            )?)
        } else {
            None
        };

        let units = plan(root, &self.options)?;
        info!(root = %root.display(), units = units.len(), "restoring dump");

        let mut report = RestoreReport::default();
        for unit in units {
            if unit.kind.is_restorable() {
                report.units.push(self.restore_unit(&unit)?);
            } else {
                report.ignored.push(unit);
            }
        }

        let flush_db = self.options.db.as_deref().unwrap_or(ADMIN_DB);
        if let Some(err) = self
            .client
            .get_last_error(flush_db, &WriteConcern::acknowledged())?
        {
            warn!(error = %err, "last write was not acknowledged");
        }

        if let Some(replayer) = replayer {
            let mut dispatcher = Dispatcher::new(&mut *self.client, &self.options);
            report.replay = Some(replayer.replay(&mut dispatcher)?);
        }

        Ok(report)
    }

    /// Runs the pipeline for one unit.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any stage.
    pub fn restore_unit(&mut self, unit: &RestoreUnit) -> RestoreResult<UnitReport> {
        // Init
        let ns = resolve_namespace(
            &unit.path,
            self.options.db.as_deref(),
            self.options.collection.as_deref(),
        )?;
        info!(path = %unit.path.display(), ns = %ns, "going into namespace");

        let metadata = if unit.kind == UnitKind::Data
            && (self.options.restore_options || self.options.restore_indexes)
        {
            let metadata = load_metadata(&unit.path)?;
            if metadata.is_none() && !ns.is_system() {
                info!(ns = %ns, "no metadata file, skipping options and indexes");
            }
            metadata.unwrap_or_default()
        } else {
            CollectionMetadata::default()
        };

        let mut ctx = UnitContext::data(ns.clone());

        self.drop_or_snapshot(&ns, unit.kind, &mut ctx)?;

        if self.options.restore_options {
            if let Some(options) = &metadata.options {
                self.create_collection(&ns, options)?;
            }
        }

        self.load(&unit.path, unit.kind, &mut ctx)?;
        info!(ns = %ns, records = ctx.counters.read, "objects found");

        if self.options.restore_indexes {
            for definition in &metadata.indexes {
                create_index(&mut *self.client, &ns, definition, false, &self.options)?;
                ctx.counters.indexes += 1;
            }
        }

        let privileges_removed = self.reconcile(&ns, &mut ctx)?;

        Ok(UnitReport {
            path: unit.path.clone(),
            namespace: ns,
            kind: unit.kind,
            counters: ctx.counters,
            privileges_removed,
        })
    }

    /// Refuses secondaries, and full restores of the config database through
    /// a router.
    fn check_destination(&mut self, root: &Path) -> RestoreResult<()> {
        if !self.client.is_master()? {
            return Err(RestoreError::NotPrimary);
        }

        let config = root.join(CONFIG_DB);
        if self.options.db.is_none() && config.is_dir() && self.client.is_router_process() {
            return Err(RestoreError::ShardedFullRestore { path: config });
        }
        Ok(())
    }

    fn namespace_exists(&mut self, ns: &Namespace) -> RestoreResult<bool> {
        let query = Query::new(Document::new().with("name", ns.full())).limit(1);
        let found = self
            .client
            .query(&ns.sibling(NAMESPACES_COLLECTION).full(), &query)?;
        Ok(!found.is_empty())
    }

    fn drop_or_snapshot(
        &mut self,
        ns: &Namespace,
        kind: UnitKind,
        ctx: &mut UnitContext,
    ) -> RestoreResult<()> {
        if kind != UnitKind::Data {
            return Ok(());
        }

        if !self.options.drop {
            if self.namespace_exists(ns)? {
                warn!(
                    ns = %ns,
                    "restoring without dropping, restored data will be inserted without raising errors; check the server log"
                );
            }
            return Ok(());
        }

        if ns.is_privilege_collection() {
            let query = Query::default().project(&[PRIVILEGE_ID_FIELD]);
            let names = self
                .client
                .query(&ns.full(), &query)?
                .iter()
                .filter_map(|doc| doc.get_str(PRIVILEGE_ID_FIELD).map(str::to_string))
                .collect::<Vec<_>>();
            info!(
                ns = %ns,
                users = names.len(),
                "keeping existing users until the dump replaces them"
            );
            ctx.retention = Some(PrivilegeRetentionSet::from_names(names));
        } else {
            info!(ns = %ns, "dropping");
            self.client.drop_collection(&ns.full())?;
        }
        Ok(())
    }

    fn create_collection(&mut self, ns: &Namespace, options: &Document) -> RestoreResult<()> {
        let mut command = Document::with_capacity(options.len() + 1);
        command.insert("create", ns.coll.as_str());
        for (key, value) in options.iter() {
            if key == "create" {
                continue;
            }
            if value.is_undefined() {
                info!(ns = %ns, field = key, "skipping undefined collection option");
                continue;
            }
            command.insert(key, value.clone());
        }

        let query = Query::new(Document::new().with("name", ns.full()))
            .project(&["options"])
            .limit(1);
        let existing = self
            .client
            .query(&ns.sibling(NAMESPACES_COLLECTION).full(), &query)?;
        if let Some(entry) = existing.first() {
            match entry.get_document("options") {
                Some(current) if options_equivalent(&command, current) => {
                    debug!(ns = %ns, "collection exists with the same options");
                }
                _ => warn!(
                    ns = %ns,
                    "collection exists with different options, the dumped options are not applied"
                ),
            }
            return Ok(());
        }

        debug!(ns = %ns, "creating collection");
        let reply = self.client.run_command(&ns.db, command)?;
        if !command_succeeded(&reply) {
            return Err(RestoreError::CommandFailed {
                db: ns.db.clone(),
                command: "create".to_string(),
                message: command_error(&reply),
            });
        }
        Ok(())
    }

    fn load(&mut self, path: &Path, kind: UnitKind, ctx: &mut UnitContext) -> RestoreResult<()> {
        let filter = if kind == UnitKind::Data {
            self.filter.as_ref()
        } else {
            None
        };
        let mut dispatcher = Dispatcher::new(&mut *self.client, &self.options);

        for record in RecordReader::open(path)? {
            let record = record?;
            ctx.counters.read += 1;
            if let Some(filter) = filter {
                if !filter.matches(&record) {
                    ctx.counters.filtered += 1;
                    continue;
                }
            }
            dispatcher.dispatch(ctx, record)?;
        }
        Ok(())
    }

    fn reconcile(&mut self, ns: &Namespace, ctx: &mut UnitContext) -> RestoreResult<u64> {
        let Some(retention) = ctx.retention.as_mut() else {
            return Ok(0);
        };
        let full = ns.full();
        let mut removed = 0;
        for name in retention.drain() {
            info!(ns = %full, user = %name, "removing user missing from the dump");
            self.client
                .remove(&full, &Document::new().with(PRIVILEGE_ID_FIELD, name))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDestination;
    use crate::records::RecordWriter;
    use std::fs;
    use tempfile::tempdir;

    fn write_records(path: &Path, docs: &[Document]) {
        let mut writer = RecordWriter::create(path).unwrap();
        for doc in docs {
            writer.write(doc).unwrap();
        }
        writer.finish().unwrap();
    }

    fn ids(n: i64) -> Vec<Document> {
        (0..n).map(|i| Document::new().with("_id", i)).collect()
    }

    #[test]
    fn options_equivalence() {
        let requested = Document::new().with("create", "c").with("capped", true).with("size", 10);
        let same = Document::new().with("size", 10.0).with("capped", true);
        let different = Document::new().with("capped", true).with("size", 20);
        let missing = Document::new().with("capped", true);
        let extra = Document::new()
            .with("capped", true)
            .with("size", 10)
            .with("max", 5);

        assert!(options_equivalent(&requested, &same));
        assert!(options_equivalent(&requested, &same.clone().with("create", "other")));
        assert!(!options_equivalent(&requested, &different));
        assert!(!options_equivalent(&requested, &missing));
        assert!(!options_equivalent(&requested, &extra));
    }

    #[test]
    fn restores_data_options_and_indexes() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("app").join("logs.bson");
        write_records(&data, &ids(3));
        fs::write(
            dir.path().join("app").join("logs.metadata.json"),
            r#"{"options": {"capped": true, "size": 4096, "autoIndexId": {"$undefined": true}},
                "indexes": [{"v": 1, "key": {"_id": 1}, "name": "_id_", "ns": "app.logs"}]}"#,
        )
        .unwrap();

        let mut dest = MemoryDestination::new();
        let report = Restorer::new(&mut dest, RestoreOptions::default())
            .unwrap()
            .run(dir.path())
            .unwrap();

        assert_eq!(report.units.len(), 1);
        assert_eq!(report.records_read(), 3);
        assert_eq!(report.indexes_created(), 1);
        assert_eq!(dest.documents("app.logs").len(), 3);
        assert_eq!(
            dest.collection_options("app.logs"),
            Some(&Document::new().with("capped", true).with("size", 4096))
        );
        assert_eq!(dest.indexes("app.logs")[0].get_str("ns"), Some("app.logs"));
    }

    #[test]
    fn existing_collection_keeps_its_options() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("app").join("logs.bson");
        write_records(&data, &ids(1));
        fs::write(
            dir.path().join("app").join("logs.metadata.json"),
            r#"{"options": {"capped": true}}"#,
        )
        .unwrap();

        let mut dest = MemoryDestination::new();
        dest.run_command("app", Document::new().with("create", "logs").with("capped", false))
            .unwrap();

        Restorer::new(&mut dest, RestoreOptions::default())
            .unwrap()
            .run(dir.path())
            .unwrap();
        assert_eq!(
            dest.collection_options("app.logs"),
            Some(&Document::new().with("capped", false))
        );
    }

    #[test]
    fn failed_create_is_fatal() {
        let dir = tempdir().unwrap();
        write_records(&dir.path().join("logs.bson"), &ids(1));
        fs::write(
            dir.path().join("logs.metadata.json"),
            r#"{"options": {"capped": true}}"#,
        )
        .unwrap();

        let mut dest = MemoryDestination::new();
        let unit = RestoreUnit {
            path: dir.path().join("logs.bson"),
            kind: UnitKind::Data,
        };
        let options = RestoreOptions::new().db("app").collection("bad$name");
        let err = Restorer::new(&mut dest, options)
            .unwrap()
            .restore_unit(&unit)
            .unwrap_err();
        assert!(matches!(err, RestoreError::CommandFailed { .. }));
        assert!(dest.documents("app.bad$name").is_empty());
    }

    #[test]
    fn filter_drops_non_matching_records() {
        let dir = tempdir().unwrap();
        write_records(&dir.path().join("app").join("users.bson"), &ids(5));

        let mut dest = MemoryDestination::new();
        let filter = Document::new().with("_id", Document::new().with("$gte", 3));
        let report = Restorer::new(&mut dest, RestoreOptions::new().filter(filter))
            .unwrap()
            .run(dir.path())
            .unwrap();

        assert_eq!(report.units[0].counters.read, 5);
        assert_eq!(report.units[0].counters.filtered, 3);
        assert_eq!(dest.documents("app.users").len(), 2);
    }

    #[test]
    fn invalid_filter_is_rejected_up_front() {
        let mut dest = MemoryDestination::new();
        let filter = Document::new().with("$where", "1");
        assert!(matches!(
            Restorer::new(&mut dest, RestoreOptions::new().filter(filter)),
            Err(RestoreError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempdir().unwrap();
        let mut dest = MemoryDestination::new();
        let err = Restorer::new(&mut dest, RestoreOptions::default())
            .unwrap()
            .run(&dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, RestoreError::DumpNotFound { .. }));
    }

    #[test]
    fn layout_error_leaves_destination_untouched() {
        let dir = tempdir().unwrap();
        write_records(&dir.path().join("a.bson"), &ids(1));
        write_records(&dir.path().join("nested").join("b.bson"), &ids(1));

        let mut dest = MemoryDestination::new();
        let err = Restorer::new(&mut dest, RestoreOptions::new().db("app"))
            .unwrap()
            .run(dir.path())
            .unwrap_err();
        assert!(matches!(err, RestoreError::LayoutViolation { .. }));
        assert!(dest.collection_names().is_empty());
    }

    #[test]
    fn ignored_files_are_reported() {
        let dir = tempdir().unwrap();
        write_records(&dir.path().join("app").join("system.profile.bson"), &ids(1));
        fs::write(dir.path().join("app").join("notes.txt"), b"hi").unwrap();

        let mut dest = MemoryDestination::new();
        let report = Restorer::new(&mut dest, RestoreOptions::default())
            .unwrap()
            .run(dir.path())
            .unwrap();
        assert!(report.units.is_empty());
        assert_eq!(report.ignored.len(), 2);
    }
}
