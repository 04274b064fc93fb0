//! An in-process destination.
//!
//! [`MemoryDestination`] keeps collections in memory and answers the subset
//! of the server protocol a restore uses: writes, finds, the
//! `system.namespaces` and `system.indexes` catalogs, the `create`,
//! `drop`, `buildinfo`, `isMaster`, `applyOps` and `getLastError` commands,
//! unique indexes, and write concern acknowledgement. The CLI restores into
//! it for dry runs and the tests use it as the server.

use crate::client::{
    command_error, command_succeeded, AckError, ClientError, ClientResult, Destination, Query,
    DUPLICATE_KEY_CODE,
};
use crate::config::WriteConcern;
use crate::matcher::{values_equal, Matcher};
use crate::namespace::{db_of, Namespace, INDEX_COLLECTION, NAMESPACES_COLLECTION};
use docrestore_codec::{Document, Value};
use std::collections::BTreeMap;

/// Version reported by `buildinfo` unless overridden.
pub const DEFAULT_SERVER_VERSION: &str = "2.4.0";

const NAMESPACE_EXISTS_CODE: i64 = 48;
const COMMAND_NOT_FOUND_CODE: i64 = 59;
const WRITE_CONCERN_TIMEOUT_CODE: i64 = 64;
const CANNOT_CREATE_INDEX_CODE: i64 = 67;
const INDEX_OPTIONS_CONFLICT_CODE: i64 = 85;
const ILLEGAL_OPERATION_CODE: i64 = 20;
const INVALID_NAMESPACE_CODE: i64 = 73;

#[derive(Debug, Clone, Default)]
struct Collection {
    options: Document,
    records: Vec<Document>,
}

/// An in-memory database server.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    collections: BTreeMap<String, Collection>,
    version: String,
    router: bool,
    primary: bool,
    replica_set_size: u32,
    connected: bool,
    last_error: Option<AckError>,
    commands: Vec<(String, String)>,
    acknowledgements: usize,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            version: DEFAULT_SERVER_VERSION.to_string(),
            router: false,
            primary: true,
            replica_set_size: 0,
            connected: true,
            last_error: None,
            commands: Vec::new(),
            acknowledgements: 0,
        }
    }
}

impl MemoryDestination {
    /// Creates an empty standalone primary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the version reported by `buildinfo`.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Makes the server behave as a sharding router.
    #[must_use]
    pub fn as_router(mut self) -> Self {
        self.router = true;
        self
    }

    /// Makes the server a member of a replica set with `members` nodes.
    #[must_use]
    pub fn with_replica_set(mut self, members: u32) -> Self {
        self.replica_set_size = members;
        self
    }

    /// Makes the server a secondary.
    #[must_use]
    pub fn as_secondary(mut self) -> Self {
        self.primary = false;
        self
    }

    /// Drops the connection; every later call fails with a transport error.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Inserts documents directly, bypassing write checks.
    pub fn seed(&mut self, ns: &str, docs: impl IntoIterator<Item = Document>) {
        self.collections
            .entry(ns.to_string())
            .or_default()
            .records
            .extend(docs);
    }

    /// Returns the documents of a collection in insertion order.
    #[must_use]
    pub fn documents(&self, ns: &str) -> &[Document] {
        self.collections
            .get(ns)
            .map(|c| c.records.as_slice())
            .unwrap_or(&[])
    }

    /// Returns true if the collection exists.
    #[must_use]
    pub fn contains(&self, ns: &str) -> bool {
        self.collections.contains_key(ns)
    }

    /// Returns the names of all collections, sorted.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Returns the creation options of a collection.
    #[must_use]
    pub fn collection_options(&self, ns: &str) -> Option<&Document> {
        self.collections.get(ns).map(|c| &c.options)
    }

    /// Returns the index definitions registered for a collection.
    #[must_use]
    pub fn indexes(&self, ns: &str) -> Vec<Document> {
        self.index_definitions(ns).cloned().collect()
    }

    /// Returns `(db, command name)` for every command run so far.
    #[must_use]
    pub fn commands(&self) -> &[(String, String)] {
        &self.commands
    }

    /// Number of `getLastError` calls so far.
    #[must_use]
    pub fn acknowledgements(&self) -> usize {
        self.acknowledgements
    }

    /// Returns the error of the last write, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&AckError> {
        self.last_error.as_ref()
    }

    fn check_connected(&self) -> ClientResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ClientError::transport("not connected"))
        }
    }

    fn parse_ns(ns: &str) -> ClientResult<Namespace> {
        Namespace::parse(ns).ok_or_else(|| ClientError::invalid_namespace(ns))
    }

    fn compile(query: &Document) -> ClientResult<Matcher> {
        Matcher::new(query).map_err(|e| ClientError::Protocol {
            message: e.to_string(),
        })
    }

    fn index_definitions<'a>(&'a self, ns: &'a str) -> impl Iterator<Item = &'a Document> + 'a {
        let catalog = format!("{}.{INDEX_COLLECTION}", db_of(ns));
        self.documents(&catalog)
            .iter()
            .filter(move |def| def.get_str("ns") == Some(ns))
    }

    fn unique_keys(&self, ns: &str) -> Vec<Document> {
        let mut keys = vec![Document::new().with("_id", 1)];
        keys.extend(
            self.index_definitions(ns)
                .filter(|def| def.get("unique").and_then(Value::as_bool) == Some(true))
                .filter_map(|def| def.get_document("key").cloned()),
        );
        keys
    }

    fn key_values(doc: &Document, key: &Document) -> Vec<Value> {
        key.keys()
            .map(|field| doc.get_path(field).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn same_key(a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
    }

    // Checks `doc` against every unique index of `ns`, ignoring the record at
    // `skip` (the one being replaced).
    fn duplicate_key(&self, ns: &str, doc: &Document, skip: Option<usize>) -> Option<AckError> {
        let records = self.documents(ns);
        for key in self.unique_keys(ns) {
            if key.contains_key("_id") && key.len() == 1 && !doc.contains_key("_id") {
                continue;
            }
            let wanted = Self::key_values(doc, &key);
            let clash = records
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, other)| Self::same_key(&Self::key_values(other, &key), &wanted));
            if clash {
                let name = key.keys().collect::<Vec<_>>().join("_");
                return Some(AckError::new(
                    Some(DUPLICATE_KEY_CODE),
                    format!("E11000 duplicate key error index: {ns}.$ {name}"),
                ));
            }
        }
        None
    }

    fn write_insert(&mut self, ns: &Namespace, doc: Document) -> Option<AckError> {
        if ns.coll == NAMESPACES_COLLECTION {
            return Some(AckError::new(
                Some(ILLEGAL_OPERATION_CODE),
                format!("cannot write to {ns}"),
            ));
        }
        if ns.is_index_collection() {
            return self.register_index(&ns.db, doc);
        }
        let full = ns.full();
        if let Some(err) = self.duplicate_key(&full, &doc, None) {
            return Some(err);
        }
        self.collections.entry(full).or_default().records.push(doc);
        None
    }

    fn register_index(&mut self, db: &str, def: Document) -> Option<AckError> {
        let (Some(target), Some(key), Some(name)) =
            (def.get_str("ns"), def.get_document("key"), def.get_str("name"))
        else {
            return Some(AckError::new(
                Some(CANNOT_CREATE_INDEX_CODE),
                "index definition needs ns, key and name",
            ));
        };
        if db_of(target) != db {
            return Some(AckError::new(
                Some(CANNOT_CREATE_INDEX_CODE),
                format!("index namespace {target} is not in database {db}"),
            ));
        }
        let unique = def.get("unique").and_then(Value::as_bool) == Some(true);

        if let Some(existing) = self
            .index_definitions(target)
            .find(|d| d.get_str("name") == Some(name))
        {
            let same_unique =
                (existing.get("unique").and_then(Value::as_bool) == Some(true)) == unique;
            if existing.get_document("key") == Some(key) && same_unique {
                return None;
            }
            return Some(AckError::new(
                Some(INDEX_OPTIONS_CONFLICT_CODE),
                format!("index {name} already exists with different options"),
            ));
        }

        if unique {
            let records = self.documents(target);
            for (i, record) in records.iter().enumerate() {
                let wanted = Self::key_values(record, key);
                if records[i + 1..]
                    .iter()
                    .any(|other| Self::same_key(&Self::key_values(other, key), &wanted))
                {
                    return Some(AckError::new(
                        Some(DUPLICATE_KEY_CODE),
                        format!("E11000 duplicate key error building index {name} on {target}"),
                    ));
                }
            }
        }

        let target = target.to_string();
        self.collections.entry(target).or_default();
        self.collections
            .entry(format!("{db}.{INDEX_COLLECTION}"))
            .or_default()
            .records
            .push(def);
        None
    }

    fn write_update(
        &mut self,
        ns: &Namespace,
        query: &Document,
        doc: Document,
    ) -> ClientResult<Option<AckError>> {
        let matcher = Self::compile(query)?;
        let full = ns.full();
        let Some(pos) = self
            .documents(&full)
            .iter()
            .position(|r| matcher.matches(r))
        else {
            return Ok(None);
        };

        let current = &self.documents(&full)[pos];
        let replacement = if doc.keys().next().is_some_and(|k| k.starts_with('$')) {
            match apply_modifiers(current, &doc) {
                Ok(updated) => updated,
                Err(message) => return Ok(Some(AckError::new(None, message))),
            }
        } else {
            let mut replacement = Document::with_capacity(doc.len() + 1);
            if let (Some(id), false) = (current.get("_id"), doc.contains_key("_id")) {
                replacement.insert("_id", id.clone());
            }
            for (k, v) in doc {
                replacement.insert(k, v);
            }
            replacement
        };

        if let Some(err) = self.duplicate_key(&full, &replacement, Some(pos)) {
            return Ok(Some(err));
        }
        if let Some(collection) = self.collections.get_mut(&full) {
            collection.records[pos] = replacement;
        }
        Ok(None)
    }

    fn write_remove(&mut self, ns: &Namespace, query: &Document) -> ClientResult<()> {
        let matcher = Self::compile(query)?;
        if let Some(collection) = self.collections.get_mut(&ns.full()) {
            collection.records.retain(|r| !matcher.matches(r));
        }
        Ok(())
    }

    fn namespace_catalog(&self, db: &str) -> Vec<Document> {
        let prefix = format!("{db}.");
        self.collections
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, collection)| {
                Document::new()
                    .with("name", name.as_str())
                    .with("options", collection.options.clone())
            })
            .collect()
    }

    fn create_collection(&mut self, db: &str, command: &Document) -> Document {
        let Some(coll) = command.get_str("create") else {
            return failure(None, "create needs a collection name");
        };
        if coll.is_empty() || coll.contains('$') {
            return failure(
                Some(INVALID_NAMESPACE_CODE),
                format!("invalid collection name {coll:?}"),
            );
        }
        let full = format!("{db}.{coll}");
        if self.collections.contains_key(&full) {
            return failure(Some(NAMESPACE_EXISTS_CODE), "collection already exists");
        }
        let options = command
            .iter()
            .filter(|(k, _)| *k != "create")
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.collections.insert(
            full,
            Collection {
                options,
                records: Vec::new(),
            },
        );
        success()
    }

    fn apply_ops(&mut self, command: &Document) -> Document {
        let Some(entries) = command.get_array("applyOps") else {
            return failure(None, "applyOps needs an array of operations");
        };
        let mut results = Vec::with_capacity(entries.len());
        for (applied, entry) in entries.iter().enumerate() {
            let outcome = entry
                .as_document()
                .ok_or_else(|| "operation must be a document".to_string())
                .and_then(|entry| self.apply_entry(entry));
            if let Err(message) = outcome {
                results.push(Value::Bool(false));
                return failure(None, message)
                    .with("applied", applied as i64)
                    .with("results", results);
            }
            results.push(Value::Bool(true));
        }
        success()
            .with("applied", entries.len() as i64)
            .with("results", results)
    }

    fn apply_entry(&mut self, entry: &Document) -> Result<(), String> {
        let op = entry.get_str("op").unwrap_or_default();
        let ns_text = entry.get_str("ns").unwrap_or_default();
        let object = entry.get_document("o").cloned().unwrap_or_default();

        if op == "n" {
            return Ok(());
        }
        if op == "c" {
            let reply = self.execute(db_of(ns_text), object);
            return if command_succeeded(&reply) {
                Ok(())
            } else {
                Err(command_error(&reply))
            };
        }

        let ns =
            Namespace::parse(ns_text).ok_or_else(|| format!("invalid namespace {ns_text:?}"))?;
        let ack = match op {
            "i" => self.write_insert(&ns, object),
            "u" => {
                let query = entry.get_document("o2").cloned().unwrap_or_default();
                self.write_update(&ns, &query, object)
                    .map_err(|e| e.to_string())?
            }
            "d" => {
                self.write_remove(&ns, &object).map_err(|e| e.to_string())?;
                None
            }
            other => return Err(format!("invalid operation type {other:?}")),
        };
        match ack {
            Some(err) => Err(err.message),
            None => Ok(()),
        }
    }

    fn execute(&mut self, db: &str, command: Document) -> Document {
        let name = command.keys().next().unwrap_or_default().to_string();
        self.commands.push((db.to_string(), name.clone()));

        match name.as_str() {
            "buildinfo" | "buildInfo" => success().with("version", self.version.as_str()),
            "isMaster" | "ismaster" => {
                let mut reply = success().with("ismaster", self.primary);
                if self.router {
                    reply.insert("msg", "isdbgrid");
                }
                reply
            }
            "create" => self.create_collection(db, &command),
            "drop" => match command.get_str("drop") {
                Some(coll) => {
                    let full = format!("{db}.{coll}");
                    if self.drop_namespace(&full) {
                        success().with("ns", full)
                    } else {
                        failure(None, "ns not found")
                    }
                }
                None => failure(None, "drop needs a collection name"),
            },
            "applyOps" => self.apply_ops(&command),
            "getLastError" | "getlasterror" => {
                let w = command
                    .get_integer("w")
                    .and_then(|w| u32::try_from(w).ok())
                    .unwrap_or(1);
                match self.acknowledge(&WriteConcern::nodes(w)) {
                    Some(err) => {
                        let mut reply = success().with("err", err.message.as_str());
                        if let Some(code) = err.code {
                            reply.insert("code", code);
                        }
                        reply
                    }
                    None => success().with("err", Value::Null),
                }
            }
            other => failure(
                Some(COMMAND_NOT_FOUND_CODE),
                format!("no such command: {other}"),
            ),
        }
    }

    fn drop_namespace(&mut self, full: &str) -> bool {
        let existed = self.collections.remove(full).is_some();
        let catalog = format!("{}.{INDEX_COLLECTION}", db_of(full));
        if let Some(indexes) = self.collections.get_mut(&catalog) {
            indexes.records.retain(|def| def.get_str("ns") != Some(full));
        }
        existed
    }

    fn acknowledge(&self, write_concern: &WriteConcern) -> Option<AckError> {
        if let Some(err) = &self.last_error {
            return Some(err.clone());
        }
        if !write_concern.needs_replication() {
            return None;
        }
        if self.replica_set_size == 0 {
            return Some(AckError::no_replication());
        }
        if write_concern.w > self.replica_set_size {
            return Some(AckError::new(
                Some(WRITE_CONCERN_TIMEOUT_CODE),
                "waiting for replication timed out",
            ));
        }
        None
    }
}

fn success() -> Document {
    Document::new().with("ok", 1)
}

fn failure(code: Option<i64>, message: impl Into<String>) -> Document {
    let mut reply = Document::new()
        .with("ok", 0)
        .with("errmsg", message.into());
    if let Some(code) = code {
        reply.insert("code", code);
    }
    reply
}

// Applies `$set`/`$unset` to a copy of `current`.
fn apply_modifiers(current: &Document, update: &Document) -> Result<Document, String> {
    let mut updated = current.clone();
    for (op, fields) in update.iter() {
        let fields = fields
            .as_document()
            .ok_or_else(|| format!("{op} needs a document"))?;
        match op {
            "$set" => {
                for (k, v) in fields.iter() {
                    updated.insert(k, v.clone());
                }
            }
            "$unset" => {
                for k in fields.keys() {
                    updated.remove(k);
                }
            }
            other => return Err(format!("unsupported update operator {other}")),
        }
    }
    Ok(updated)
}

impl Destination for MemoryDestination {
    fn insert(&mut self, ns: &str, doc: Document) -> ClientResult<()> {
        self.check_connected()?;
        let ns = Self::parse_ns(ns)?;
        self.last_error = self.write_insert(&ns, doc);
        Ok(())
    }

    fn update(&mut self, ns: &str, query: &Document, doc: Document) -> ClientResult<()> {
        self.check_connected()?;
        let ns = Self::parse_ns(ns)?;
        self.last_error = self.write_update(&ns, query, doc)?;
        Ok(())
    }

    fn remove(&mut self, ns: &str, query: &Document) -> ClientResult<()> {
        self.check_connected()?;
        let ns = Self::parse_ns(ns)?;
        self.write_remove(&ns, query)?;
        self.last_error = None;
        Ok(())
    }

    fn query(&mut self, ns: &str, query: &Query) -> ClientResult<Vec<Document>> {
        self.check_connected()?;
        let parsed = Self::parse_ns(ns)?;
        let matcher = Self::compile(&query.filter)?;

        let source = if parsed.coll == NAMESPACES_COLLECTION {
            self.namespace_catalog(&parsed.db)
        } else {
            self.documents(ns).to_vec()
        };

        let ordered: Box<dyn Iterator<Item = Document>> = if query.newest_first {
            Box::new(source.into_iter().rev())
        } else {
            Box::new(source.into_iter())
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(ordered
            .filter(|doc| matcher.matches(doc))
            .take(limit)
            .map(|doc| match &query.projection {
                Some(fields) => {
                    let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                    doc.project(&fields)
                }
                None => doc,
            })
            .collect())
    }

    fn run_command(&mut self, db: &str, command: Document) -> ClientResult<Document> {
        self.check_connected()?;
        Ok(self.execute(db, command))
    }

    fn drop_collection(&mut self, ns: &str) -> ClientResult<bool> {
        self.check_connected()?;
        let parsed = Self::parse_ns(ns)?;
        if parsed.is_system() {
            self.last_error = Some(AckError::new(
                Some(ILLEGAL_OPERATION_CODE),
                format!("cannot drop system collection {ns}"),
            ));
            return Ok(false);
        }
        self.last_error = None;
        Ok(self.drop_namespace(ns))
    }

    fn get_last_error(
        &mut self,
        _db: &str,
        write_concern: &WriteConcern,
    ) -> ClientResult<Option<AckError>> {
        self.check_connected()?;
        self.acknowledgements += 1;
        Ok(self.acknowledge(write_concern))
    }

    fn is_master(&mut self) -> ClientResult<bool> {
        self.check_connected()?;
        Ok(self.primary)
    }

    fn is_router_process(&self) -> bool {
        self.router
    }
}
