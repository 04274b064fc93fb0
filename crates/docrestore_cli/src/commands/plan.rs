//! Plan command implementation.

use super::kind_name;
use docrestore_core::{plan, resolve_namespace, RestoreOptions};
use serde::Serialize;
use std::path::Path;

/// A planned unit for output.
#[derive(Debug, Serialize)]
pub struct PlannedUnit {
    /// Dump file.
    pub path: String,
    /// Unit kind.
    pub kind: &'static str,
    /// Destination namespace, for units that would be restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Runs the plan command.
pub fn run(
    path: &Path,
    db: Option<String>,
    collection: Option<String>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let units = planned_units(path, db, collection)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&units)?);
        }
        _ => {
            println!("Restore plan ({} units)", units.len());
            println!("================");
            for unit in &units {
                match &unit.namespace {
                    Some(ns) => println!("{:8} {} <- {}", unit.kind, ns, unit.path),
                    None => println!("{:8} {}", unit.kind, unit.path),
                }
            }
        }
    }

    Ok(())
}

fn planned_units(
    path: &Path,
    db: Option<String>,
    collection: Option<String>,
) -> Result<Vec<PlannedUnit>, Box<dyn std::error::Error>> {
    let mut options = RestoreOptions::new();
    if let Some(db) = db {
        options = options.db(db);
    }
    if let Some(collection) = collection {
        options = options.collection(collection);
    }

    let mut units = Vec::new();
    for unit in plan(path, &options)? {
        let namespace = if unit.kind.is_restorable() {
            let ns = resolve_namespace(
                &unit.path,
                options.db.as_deref(),
                options.collection.as_deref(),
            )?;
            Some(ns.full())
        } else {
            None
        };
        units.push(PlannedUnit {
            path: unit.path.display().to_string(),
            kind: kind_name(unit.kind),
            namespace,
        });
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_testkit::prelude::*;

    #[test]
    fn plan_lists_units_in_restore_order() {
        let dump = DumpBuilder::new()
            .data("app/users.bson", &numbered(1))
            .data("app/system.indexes.bson", &[index_definition("app.users", "n")])
            .data("app/system.profile.bson", &numbered(1))
            .oplog(&[]);

        let units = planned_units(dump.root(), None, None).unwrap();
        let kinds: Vec<_> = units.iter().map(|u| u.kind).collect();
        assert_eq!(kinds, vec!["skip", "data", "indexes"]);
        assert_eq!(units[1].namespace.as_deref(), Some("app.users"));
        assert_eq!(units[2].namespace.as_deref(), Some("app.system.indexes"));
        assert!(units[0].namespace.is_none());
    }

    #[test]
    fn plan_applies_overrides() {
        let dump = DumpBuilder::new().data("export.bson", &numbered(1));
        let units = planned_units(
            dump.root(),
            Some("archive".to_string()),
            Some("people".to_string()),
        )
        .unwrap();
        assert_eq!(units[0].namespace.as_deref(), Some("archive.people"));
    }

    #[test]
    fn plan_rejects_bad_layout() {
        let dump = DumpBuilder::new().data("nested/a.bson", &numbered(1));
        assert!(planned_units(dump.root(), Some("app".to_string()), None).is_err());
    }
}
