//! Per-record routing.
//!
//! The [`Dispatcher`] sends one decoded record to the destination. What it
//! does depends only on the current [`UnitContext`] and the record itself.

use crate::client::{command_error, command_succeeded, Destination};
use crate::config::{RestoreOptions, WriteConcern};
use crate::error::RestoreResult;
use crate::index::create_index;
use crate::matcher::Matcher;
use crate::namespace::{db_of, Namespace, NamespaceContext, PRIVILEGE_ID_FIELD};
use docrestore_codec::{Document, Value};
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

/// Principal names captured from the destination privilege collection in
/// place of a drop.
///
/// Names that reappear in the dump are replaced in place and taken out of the
/// set; whatever is left after the load is removed from the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeRetentionSet {
    names: BTreeSet<String>,
}

impl PrivilegeRetentionSet {
    /// Creates a set from captured names.
    pub fn from_names(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Takes a name out of the set. Returns true if it was present.
    pub fn take(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    /// Returns true if the name is pending.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of pending names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no name is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Empties the set, returning the pending names in order.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.names).into_iter().collect()
    }
}

/// Record counts for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCounters {
    /// Records read from the file.
    pub read: u64,
    /// Records inserted.
    pub inserted: u64,
    /// Privilege records replaced in place.
    pub replaced: u64,
    /// Index definitions created.
    pub indexes: u64,
    /// Records rejected by the restore filter.
    pub filtered: u64,
    /// Log entries applied.
    pub applied: u64,
    /// Log entries outside the replay window.
    pub skipped: u64,
    /// No-op log entries.
    pub noops: u64,
    /// Log entries without a namespace.
    pub unroutable: u64,
}

/// State of the unit currently being restored.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// How records are interpreted.
    pub namespace: NamespaceContext,
    /// Pending privilege names (privilege collection under drop mode only).
    pub retention: Option<PrivilegeRetentionSet>,
    /// Replay window (log replay only).
    pub replay_window: Option<Matcher>,
    /// Counts of what happened to the records.
    pub counters: UnitCounters,
}

impl UnitContext {
    /// Context for a data unit.
    #[must_use]
    pub fn data(namespace: Namespace) -> Self {
        Self {
            namespace: NamespaceContext::DataUnit(namespace),
            retention: None,
            replay_window: None,
            counters: UnitCounters::default(),
        }
    }

    /// Context for oplog replay, optionally bounded by a window.
    #[must_use]
    pub fn log_replay(window: Option<Matcher>) -> Self {
        Self {
            namespace: NamespaceContext::LogReplayUnit,
            retention: None,
            replay_window: window,
            counters: UnitCounters::default(),
        }
    }
}

/// What the dispatcher did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Inserted into the current namespace.
    Inserted,
    /// Replaced a pending privilege record.
    Replaced,
    /// Created an index.
    IndexCreated,
    /// Applied a log entry.
    Applied,
    /// Log entry outside the replay window.
    Skipped,
    /// No-op log entry.
    NoOp,
    /// Log entry without a namespace, not applied.
    Unroutable,
}

/// Routes records to the destination.
pub struct Dispatcher<'a, D: Destination + ?Sized> {
    client: &'a mut D,
    options: &'a RestoreOptions,
}

impl<'a, D: Destination + ?Sized> Dispatcher<'a, D> {
    /// Creates a dispatcher.
    pub fn new(client: &'a mut D, options: &'a RestoreOptions) -> Self {
        Self { client, options }
    }

    /// The destination.
    pub fn client(&mut self) -> &mut D {
        &mut *self.client
    }

    /// The restore options.
    #[must_use]
    pub fn options(&self) -> &RestoreOptions {
        self.options
    }

    /// Dispatches one record and updates the unit counters.
    ///
    /// # Errors
    ///
    /// Returns an error for client failures and rejected index definitions.
    /// Acknowledgement errors on data are logged, not returned.
    pub fn dispatch(
        &mut self,
        ctx: &mut UnitContext,
        record: Document,
    ) -> RestoreResult<Disposition> {
        let disposition = match &ctx.namespace {
            NamespaceContext::LogReplayUnit => self.apply_log_entry(ctx, record)?,
            NamespaceContext::DataUnit(ns) if ns.is_index_collection() => {
                create_index(self.client, ns, &record, true, self.options)?;
                Disposition::IndexCreated
            }
            NamespaceContext::DataUnit(ns) => {
                let full = ns.full();
                let pending = match (ctx.retention.as_mut(), record.get_str(PRIVILEGE_ID_FIELD)) {
                    (Some(retention), Some(name)) if retention.contains(name) => {
                        retention.take(name);
                        Some(name.to_string())
                    }
                    _ => None,
                };
                match pending {
                    Some(name) => {
                        debug!(ns = %full, user = %name, "replacing privilege document");
                        let query = Document::new().with(PRIVILEGE_ID_FIELD, name);
                        self.client.update(&full, &query, record)?;
                        Disposition::Replaced
                    }
                    None => {
                        self.client.insert(&full, record)?;
                        self.await_write_concern(ns.db.as_str(), &full)?;
                        Disposition::Inserted
                    }
                }
            }
        };

        let counters = &mut ctx.counters;
        match disposition {
            Disposition::Inserted => counters.inserted += 1,
            Disposition::Replaced => counters.replaced += 1,
            Disposition::IndexCreated => counters.indexes += 1,
            Disposition::Applied => counters.applied += 1,
            Disposition::Skipped => counters.skipped += 1,
            Disposition::NoOp => counters.noops += 1,
            Disposition::Unroutable => counters.unroutable += 1,
        }
        Ok(disposition)
    }

    fn apply_log_entry(&mut self, ctx: &UnitContext, entry: Document) -> RestoreResult<Disposition> {
        if entry.get_str("op") == Some("n") {
            return Ok(Disposition::NoOp);
        }
        if let Some(window) = &ctx.replay_window {
            if !window.matches(&entry) {
                return Ok(Disposition::Skipped);
            }
        }

        let ns = entry.get_str("ns").unwrap_or_default().to_string();
        let db = db_of(&ns).to_string();
        if db.is_empty() {
            warn!(ts = ?entry.get_timestamp("ts"), "log entry has no namespace, not applying it");
            return Ok(Disposition::Unroutable);
        }

        let command = Document::new().with("applyOps", vec![Value::Document(entry)]);
        let reply = self.client.run_command(&db, command)?;
        if !command_succeeded(&reply) {
            error!(ns = %ns, error = %command_error(&reply), "applying log entry failed");
        }
        self.await_write_concern(&db, &ns)?;
        Ok(Disposition::Applied)
    }

    fn await_write_concern(&mut self, db: &str, ns: &str) -> RestoreResult<()> {
        let Some(write_concern) = self.options.write_concern.filter(WriteConcern::waits) else {
            return Ok(());
        };
        if let Some(err) = self.client.get_last_error(db, &write_concern)? {
            error!(ns = %ns, code = ?err.code, error = %err, "write not acknowledged");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDestination;
    use docrestore_codec::Timestamp;

    fn entry(op: &str, secs: u32, id: i64) -> Document {
        Document::new()
            .with("ts", Timestamp::new(secs, 0))
            .with("op", op)
            .with("ns", "app.events")
            .with("o", Document::new().with("_id", id))
    }

    #[test]
    fn data_records_are_inserted() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::default();
        let mut ctx = UnitContext::data(Namespace::new("app", "users"));

        let mut dispatcher = Dispatcher::new(&mut dest, &options);
        for id in 0..3 {
            let d = dispatcher
                .dispatch(&mut ctx, Document::new().with("_id", id))
                .unwrap();
            assert_eq!(d, Disposition::Inserted);
        }
        assert_eq!(ctx.counters.inserted, 3);
        assert_eq!(dest.documents("app.users").len(), 3);
    }

    #[test]
    fn duplicate_insert_is_not_fatal() {
        let mut dest = MemoryDestination::new();
        dest.seed("app.users", vec![Document::new().with("_id", 1)]);
        let options = RestoreOptions::new().write_concern(WriteConcern::acknowledged());
        let mut ctx = UnitContext::data(Namespace::new("app", "users"));

        let result = Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, Document::new().with("_id", 1));
        assert!(result.is_ok());
        assert_eq!(dest.documents("app.users").len(), 1);
    }

    #[test]
    fn index_collection_records_create_indexes() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::default();
        let mut ctx = UnitContext::data(Namespace::new("restored", "system.indexes"));
        let def = Document::new()
            .with("v", 1)
            .with("key", Document::new().with("a", 1))
            .with("ns", "orig.things")
            .with("name", "a_1");

        let d = Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, def)
            .unwrap();
        assert_eq!(d, Disposition::IndexCreated);
        assert_eq!(dest.indexes("restored.things").len(), 1);
    }

    #[test]
    fn pending_privilege_records_are_replaced() {
        let mut dest = MemoryDestination::new();
        dest.seed(
            "app.system.users",
            vec![Document::new().with("user", "a").with("pwd", "old")],
        );
        let options = RestoreOptions::new().drop(true);
        let mut ctx = UnitContext::data(Namespace::new("app", "system.users"));
        ctx.retention = Some(PrivilegeRetentionSet::from_names(["a".to_string()]));

        let mut dispatcher = Dispatcher::new(&mut dest, &options);
        let replaced = dispatcher
            .dispatch(&mut ctx, Document::new().with("user", "a").with("pwd", "new"))
            .unwrap();
        let inserted = dispatcher
            .dispatch(&mut ctx, Document::new().with("user", "b"))
            .unwrap();

        assert_eq!(replaced, Disposition::Replaced);
        assert_eq!(inserted, Disposition::Inserted);
        assert!(ctx.retention.as_ref().unwrap().is_empty());
        assert_eq!(
            dest.documents("app.system.users"),
            &[
                Document::new().with("user", "a").with("pwd", "new"),
                Document::new().with("user", "b"),
            ]
        );
    }

    #[test]
    fn log_entries_respect_window_and_noops() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::default();
        let window = Matcher::new(
            &Document::new().with("ts", Document::new().with("$lt", Timestamp::new(100, 0))),
        )
        .unwrap();
        let mut ctx = UnitContext::log_replay(Some(window));

        let mut dispatcher = Dispatcher::new(&mut dest, &options);
        let results: Vec<_> = [entry("i", 10, 1), entry("n", 20, 0), entry("i", 200, 2)]
            .into_iter()
            .map(|e| dispatcher.dispatch(&mut ctx, e).unwrap())
            .collect();

        assert_eq!(
            results,
            vec![Disposition::Applied, Disposition::NoOp, Disposition::Skipped]
        );
        assert_eq!(ctx.counters.applied, 1);
        assert_eq!(ctx.counters.skipped, 1);
        assert_eq!(dest.documents("app.events"), &[Document::new().with("_id", 1)]);
        assert_eq!(dest.commands(), &[("app".to_string(), "applyOps".to_string())]);
    }

    #[test]
    fn failed_apply_is_not_fatal() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::default();
        let mut ctx = UnitContext::log_replay(None);

        let bad = entry("x", 1, 1);
        let d = Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, bad)
            .unwrap();
        assert_eq!(d, Disposition::Applied);
    }

    #[test]
    fn entries_without_namespace_are_not_counted_as_skipped() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::default();
        let mut ctx = UnitContext::log_replay(None);

        let mut orphan = entry("i", 1, 1);
        orphan.remove("ns");
        let d = Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, orphan)
            .unwrap();

        assert_eq!(d, Disposition::Unroutable);
        assert_eq!(ctx.counters.unroutable, 1);
        assert_eq!((ctx.counters.applied, ctx.counters.skipped), (0, 0));
        assert!(dest.commands().is_empty());
    }

    #[test]
    fn zero_write_concern_does_not_wait() {
        let mut dest = MemoryDestination::new();
        let options = RestoreOptions::new().write_concern(WriteConcern::nodes(0));
        let mut ctx = UnitContext::data(Namespace::new("app", "users"));
        Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, Document::new().with("_id", 1))
            .unwrap();
        assert_eq!(dest.acknowledgements(), 0);

        let options = RestoreOptions::new().write_concern(WriteConcern::acknowledged());
        Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, Document::new().with("_id", 2))
            .unwrap();
        assert_eq!(dest.acknowledgements(), 1);
        assert_eq!(ctx.counters.inserted, 2);
    }

    #[test]
    fn client_failure_is_fatal() {
        let mut dest = MemoryDestination::new();
        dest.disconnect();
        let options = RestoreOptions::default();
        let mut ctx = UnitContext::data(Namespace::new("app", "users"));
        assert!(Dispatcher::new(&mut dest, &options)
            .dispatch(&mut ctx, Document::new())
            .is_err());
    }

    #[test]
    fn retention_set_drains_in_order() {
        let mut set = PrivilegeRetentionSet::from_names(["c", "a", "b"].map(String::from));
        assert!(set.contains("a"));
        assert!(set.take("a"));
        assert!(!set.take("a"));
        assert_eq!(set.drain(), vec!["b".to_string(), "c".to_string()]);
        assert!(set.is_empty());
    }
}
