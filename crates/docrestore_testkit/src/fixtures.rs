//! Dump fixtures and restore helpers.
//!
//! Provides a builder for dump trees on temporary directories and
//! convenience functions for running a restore against them.

use docrestore_core::{
    Destination, Document, RecordReader, RecordWriter, RestoreOptions, RestoreReport,
    RestoreResult, Restorer, OPLOG_FILE,
};
use docrestore_storage::InMemoryBackend;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Contents of a `<collection>.metadata.json` sidecar.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sidecar {
    /// Collection creation options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    /// Index definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<serde_json::Value>,
}

impl Sidecar {
    /// Creates an empty sidecar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the creation options.
    #[must_use]
    pub fn options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Adds an index definition.
    #[must_use]
    pub fn index(mut self, definition: serde_json::Value) -> Self {
        self.indexes.push(definition);
        self
    }
}

/// A dump tree on a temporary directory.
///
/// Paths passed to the builder are relative to the dump root and use `/`
/// separators. Parent directories are created as needed. The directory is
/// removed when the builder is dropped.
pub struct DumpBuilder {
    dir: TempDir,
}

impl DumpBuilder {
    /// Creates an empty dump.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// The dump root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a dump-relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.dir.path().to_path_buf(), |path, part| path.join(part))
    }

    /// Writes a data file holding `docs`.
    #[must_use]
    pub fn data(self, relative: &str, docs: &[Document]) -> Self {
        write_records(&self.path(relative), docs);
        self
    }

    /// Writes the sidecar of the data file at `relative`.
    #[must_use]
    pub fn sidecar(self, relative: &str, sidecar: &Sidecar) -> Self {
        let json = serde_json::to_string_pretty(sidecar).expect("Failed to serialize sidecar");
        self.raw(&sidecar_relative(relative), json.as_bytes())
    }

    /// Writes the root oplog file.
    #[must_use]
    pub fn oplog(self, entries: &[Document]) -> Self {
        self.data(OPLOG_FILE, entries)
    }

    /// Writes a file with arbitrary contents.
    #[must_use]
    pub fn raw(self, relative: &str, contents: &[u8]) -> Self {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, contents).expect("Failed to write file");
        self
    }

    /// Creates an empty directory.
    #[must_use]
    pub fn dir(self, relative: &str) -> Self {
        fs::create_dir_all(self.path(relative)).expect("Failed to create directory");
        self
    }
}

impl Default for DumpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn sidecar_relative(data_relative: &str) -> String {
    let base = data_relative
        .rsplit_once('.')
        .map_or(data_relative, |(base, _)| base);
    format!("{base}.metadata.json")
}

/// Writes `docs` as a dump file at `path`.
pub fn write_records(path: &Path, docs: &[Document]) {
    let mut writer = RecordWriter::create(path).expect("Failed to create dump file");
    for doc in docs {
        writer.write(doc).expect("Failed to write record");
    }
    writer.finish().expect("Failed to finish dump file");
}

/// Encodes `docs` as the bytes of a dump file.
pub fn encode_records(docs: &[Document]) -> Vec<u8> {
    let mut writer = RecordWriter::new(InMemoryBackend::new());
    for doc in docs {
        writer.write(doc).expect("Failed to encode record");
    }
    writer.into_backend().data()
}

/// Reads every record of a dump file.
pub fn read_records(path: &Path) -> RestoreResult<Vec<Document>> {
    RecordReader::open(path)?.collect()
}

/// Restores `root` into `destination` and hands both back.
pub fn restore_into<D: Destination>(
    mut destination: D,
    root: &Path,
    options: RestoreOptions,
) -> (D, RestoreResult<RestoreReport>) {
    let report = Restorer::new(&mut destination, options).and_then(|mut r| r.run(root));
    (destination, report)
}

/// Common dump layouts.
pub mod scenarios {
    use super::*;
    use crate::documents::{index_definition, numbered, oplog};

    /// Two databases with two collections each, every collection with a
    /// sidecar declaring one secondary index.
    pub fn two_databases(records: i64) -> DumpBuilder {
        let mut dump = DumpBuilder::new();
        for db in ["inventory", "sales"] {
            for coll in ["items", "orders"] {
                let ns = format!("{db}.{coll}");
                let data = format!("{db}/{coll}.bson");
                dump = dump.data(&data, &numbered(records)).sidecar(
                    &data,
                    &Sidecar::new()
                        .options(serde_json::json!({}))
                        .index(document_json(&index_definition(&ns, "sku"))),
                );
            }
        }
        dump
    }

    /// A single collection plus a root oplog with inserts at seconds
    /// `1..=entries`.
    pub fn with_oplog(entries: u32) -> DumpBuilder {
        let log: Vec<Document> = (1..=entries)
            .map(|secs| oplog::insert("app.events", secs, i64::from(secs) + 1000))
            .collect();
        DumpBuilder::new()
            .data("app/events.bson", &numbered(3))
            .oplog(&log)
    }

    /// Converts a plain document (text, integers and nested documents) to
    /// sidecar JSON.
    pub fn document_json(doc: &Document) -> serde_json::Value {
        use docrestore_core::Value;
        fn convert(value: &Value) -> serde_json::Value {
            match value {
                Value::Null | Value::Undefined => serde_json::Value::Null,
                Value::Bool(b) => serde_json::Value::Bool(*b),
                Value::Integer(n) => serde_json::Value::from(*n),
                Value::Float(f) => serde_json::Value::from(*f),
                Value::Text(s) => serde_json::Value::from(s.as_str()),
                Value::Timestamp(ts) => {
                    serde_json::json!({"$timestamp": {"t": ts.secs, "i": ts.inc}})
                }
                Value::Bytes(b) => serde_json::Value::from(b.clone()),
                Value::Array(items) => items.iter().map(convert).collect(),
                Value::Document(doc) => document_json(doc),
            }
        }
        doc.iter()
            .map(|(k, v)| (k.to_string(), convert(v)))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}
