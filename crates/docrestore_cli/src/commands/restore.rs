//! Restore command implementation.

use super::{kind_name, parse_query};
use clap::Args;
use docrestore_core::{
    MemoryDestination, RestoreOptions, RestoreReport, Restorer, WriteConcern,
    DEFAULT_SERVER_VERSION,
};
use serde::Serialize;
use std::path::Path;

/// Flags of the restore command.
#[derive(Debug, Clone, Default, Args)]
pub struct RestoreArgs {
    /// Drop each collection before restoring it
    #[arg(long)]
    pub drop: bool,

    /// Do not create collections with their dumped options
    #[arg(long)]
    pub no_options_restore: bool,

    /// Do not create the dumped indexes
    #[arg(long)]
    pub no_index_restore: bool,

    /// Keep the index version field of dumped indexes
    #[arg(long)]
    pub keep_index_version: bool,

    /// Number of nodes each write must reach
    #[arg(short, long)]
    pub w: Option<u32>,

    /// Database to restore into
    #[arg(short, long)]
    pub db: Option<String>,

    /// Collection to restore into (needs --db)
    #[arg(short, long)]
    pub collection: Option<String>,

    /// Replay the dump's oplog after restoring
    #[arg(long)]
    pub oplog_replay: bool,

    /// Replay only entries before <seconds>[:<increment>]
    #[arg(long)]
    pub oplog_limit: Option<String>,

    /// Restore only records matching this JSON query
    #[arg(long)]
    pub filter: Option<String>,

    /// Server version the destination reports
    #[arg(long, default_value = DEFAULT_SERVER_VERSION)]
    pub server_version: String,

    /// Run the destination as a replica set of this many members
    #[arg(long)]
    pub replica_set: Option<u32>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl RestoreArgs {
    /// Maps the flags onto restore options.
    pub fn options(&self) -> Result<RestoreOptions, Box<dyn std::error::Error>> {
        let mut options = RestoreOptions::new()
            .drop(self.drop)
            .restore_options(!self.no_options_restore)
            .restore_indexes(!self.no_index_restore)
            .keep_index_version(self.keep_index_version)
            .oplog_replay(self.oplog_replay);
        if let Some(w) = self.w {
            options = options.write_concern(WriteConcern::nodes(w));
        }
        if let Some(db) = &self.db {
            options = options.db(db.as_str());
        }
        if let Some(collection) = &self.collection {
            options = options.collection(collection.as_str());
        }
        if let Some(limit) = &self.oplog_limit {
            options = options.oplog_limit(limit.as_str());
        }
        if let Some(filter) = &self.filter {
            options = options.filter(parse_query(filter)?);
        }
        Ok(options)
    }

    fn destination(&self) -> MemoryDestination {
        let destination = MemoryDestination::new().with_version(self.server_version.as_str());
        match self.replica_set {
            Some(members) => destination.with_replica_set(members),
            None => destination,
        }
    }
}

/// Restore result representation for output.
#[derive(Debug, Serialize)]
pub struct RestoreSummary {
    /// Dump path.
    pub path: String,
    /// Restored units in order.
    pub units: Vec<UnitSummary>,
    /// Files that were listed but not restored.
    pub ignored: Vec<String>,
    /// Oplog replay outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplaySummary>,
    /// Records read across all units.
    pub records_read: u64,
    /// Indexes created across all units.
    pub indexes_created: u64,
    /// Destination collections and their record counts after the run.
    pub collections: Vec<CollectionSummary>,
}

/// One restored unit.
#[derive(Debug, Serialize)]
pub struct UnitSummary {
    /// Dump file.
    pub path: String,
    /// Destination namespace.
    pub namespace: String,
    /// Unit kind.
    pub kind: &'static str,
    /// Records read.
    pub read: u64,
    /// Records inserted.
    pub inserted: u64,
    /// Privilege documents replaced.
    pub replaced: u64,
    /// Records dropped by the filter.
    pub filtered: u64,
    /// Indexes created.
    pub indexes: u64,
    /// Privilege documents removed.
    pub privileges_removed: u64,
}

/// Oplog replay outcome.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    /// Entries applied.
    pub applied: u64,
    /// Entries outside the replay window.
    pub skipped: u64,
}

/// A destination collection.
#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    /// Namespace.
    pub namespace: String,
    /// Number of records.
    pub count: usize,
}

/// Runs the restore command.
pub fn run(path: &Path, args: &RestoreArgs) -> Result<(), Box<dyn std::error::Error>> {
    let summary = restore(path, args)?;

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

/// Restores the dump at `path` into a fresh in-process destination.
pub fn restore(path: &Path, args: &RestoreArgs) -> Result<RestoreSummary, Box<dyn std::error::Error>> {
    let options = args.options()?;
    let mut destination = args.destination();
    let report = Restorer::new(&mut destination, options)?.run(path)?;
    Ok(summarize(path, &report, &destination))
}

fn summarize(path: &Path, report: &RestoreReport, destination: &MemoryDestination) -> RestoreSummary {
    RestoreSummary {
        path: path.display().to_string(),
        units: report
            .units
            .iter()
            .map(|unit| UnitSummary {
                path: unit.path.display().to_string(),
                namespace: unit.namespace.full(),
                kind: kind_name(unit.kind),
                read: unit.counters.read,
                inserted: unit.counters.inserted,
                replaced: unit.counters.replaced,
                filtered: unit.counters.filtered,
                indexes: unit.counters.indexes,
                privileges_removed: unit.privileges_removed,
            })
            .collect(),
        ignored: report
            .ignored
            .iter()
            .map(|unit| unit.path.display().to_string())
            .collect(),
        replay: report.replay.map(|replay| ReplaySummary {
            applied: replay.applied,
            skipped: replay.skipped,
        }),
        records_read: report.records_read(),
        indexes_created: report.indexes_created(),
        collections: destination
            .collection_names()
            .into_iter()
            .map(|namespace| {
                let count = destination.documents(&namespace).len();
                CollectionSummary { namespace, count }
            })
            .collect(),
    }
}

fn print_text_output(summary: &RestoreSummary) {
    println!("Restore of {}", summary.path);
    println!("================");
    println!();

    for unit in &summary.units {
        print!("{:8} {} <- {}", unit.kind, unit.namespace, unit.path);
        print!(" read={}", unit.read);
        if unit.filtered > 0 {
            print!(" filtered={}", unit.filtered);
        }
        if unit.replaced > 0 {
            print!(" replaced={}", unit.replaced);
        }
        if unit.indexes > 0 {
            print!(" indexes={}", unit.indexes);
        }
        if unit.privileges_removed > 0 {
            print!(" users_removed={}", unit.privileges_removed);
        }
        println!();
    }

    for path in &summary.ignored {
        println!("ignored  {path}");
    }

    println!();
    println!("Records read:    {}", summary.records_read);
    println!("Indexes created: {}", summary.indexes_created);
    if let Some(replay) = &summary.replay {
        println!(
            "Oplog replay:    {} applied, {} skipped",
            replay.applied, replay.skipped
        );
    }

    println!();
    println!("Collections ({} total)", summary.collections.len());
    for collection in &summary.collections {
        println!("  {:40} {}", collection.namespace, collection.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_testkit::prelude::*;

    fn args() -> RestoreArgs {
        RestoreArgs {
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            format: "text".to_string(),
            ..RestoreArgs::default()
        }
    }

    #[test]
    fn flags_map_onto_options() {
        let args = RestoreArgs {
            drop: true,
            no_index_restore: true,
            w: Some(2),
            db: Some("app".to_string()),
            filter: Some(r#"{"n": {"$gt": 1}}"#.to_string()),
            ..args()
        };
        let options = args.options().unwrap();
        assert!(options.drop);
        assert!(options.restore_options);
        assert!(!options.restore_indexes);
        assert_eq!(options.write_concern, Some(WriteConcern::nodes(2)));
        assert_eq!(options.db.as_deref(), Some("app"));
        assert_eq!(
            options.filter,
            Some(Document::new().with("n", Document::new().with("$gt", 1)))
        );
    }

    #[test]
    fn restore_summarizes_units_and_collections() {
        let dump = DumpBuilder::new()
            .data("app/users.bson", &numbered(3))
            .raw("app/notes.txt", b"x");
        let summary = restore(dump.root(), &args()).unwrap();

        assert_eq!(summary.units.len(), 1);
        assert_eq!(summary.units[0].namespace, "app.users");
        assert_eq!(summary.units[0].kind, "data");
        assert_eq!(summary.ignored.len(), 1);
        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.collections.len(), 1);
        assert_eq!(summary.collections[0].count, 3);
    }

    #[test]
    fn restore_reports_replay() {
        let dump = DumpBuilder::new().oplog(&[
            oplog::insert("app.events", 1, 1),
            oplog::noop(2),
        ]);
        let args = RestoreArgs {
            oplog_replay: true,
            ..args()
        };
        let summary = restore(dump.root(), &args).unwrap();
        let replay = summary.replay.unwrap();
        assert_eq!((replay.applied, replay.skipped), (1, 0));
    }

    #[test]
    fn old_destination_rejects_replay() {
        let dump = DumpBuilder::new().oplog(&[oplog::insert("app.events", 1, 1)]);
        let args = RestoreArgs {
            oplog_replay: true,
            server_version: "1.6.0".to_string(),
            ..args()
        };
        assert!(restore(dump.root(), &args).is_err());
    }
}
