//! Builders for the documents found in dumps.

use docrestore_core::{Document, Timestamp, PRIVILEGE_ID_FIELD};

/// Returns `n` documents with `_id` values `0..n`.
pub fn numbered(n: i64) -> Vec<Document> {
    (0..n).map(|i| Document::new().with("_id", i)).collect()
}

/// Returns `n` documents with `_id` and a `group` field cycling over
/// `groups` values.
pub fn grouped(n: i64, groups: i64) -> Vec<Document> {
    (0..n)
        .map(|i| {
            Document::new()
                .with("_id", i)
                .with("group", i % groups.max(1))
        })
        .collect()
}

/// A privilege document for `name`.
pub fn user(name: &str) -> Document {
    Document::new()
        .with("_id", format!("user-{name}"))
        .with(PRIVILEGE_ID_FIELD, name)
        .with("pwd", format!("hash-{name}"))
}

/// An ascending single-field index definition as dumped from `ns`.
pub fn index_definition(ns: &str, field: &str) -> Document {
    Document::new()
        .with("v", 1)
        .with("key", Document::new().with(field, 1))
        .with("ns", ns)
        .with("name", format!("{field}_1"))
}

/// Oplog entry builders.
pub mod oplog {
    use super::*;

    /// An entry with an explicit operation and payload.
    pub fn entry(op: &str, ns: &str, ts: Timestamp, o: Document) -> Document {
        Document::new()
            .with("ts", ts)
            .with("h", i64::from(ts.secs) * 1000 + i64::from(ts.inc))
            .with("op", op)
            .with("ns", ns)
            .with("o", o)
    }

    /// An insert of `{_id: id}`.
    pub fn insert(ns: &str, secs: u32, id: i64) -> Document {
        entry("i", ns, Timestamp::new(secs, 0), Document::new().with("_id", id))
    }

    /// A `$set` update of one field on the document with `_id: id`.
    pub fn set(ns: &str, secs: u32, id: i64, field: &str, value: i64) -> Document {
        entry(
            "u",
            ns,
            Timestamp::new(secs, 0),
            Document::new().with("$set", Document::new().with(field, value)),
        )
        .with("o2", Document::new().with("_id", id))
    }

    /// A delete of the document with `_id: id`.
    pub fn delete(ns: &str, secs: u32, id: i64) -> Document {
        entry("d", ns, Timestamp::new(secs, 0), Document::new().with("_id", id))
    }

    /// A no-op entry.
    pub fn noop(secs: u32) -> Document {
        entry(
            "n",
            "",
            Timestamp::new(secs, 0),
            Document::new().with("msg", "periodic noop"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_ids_are_sequential() {
        let docs = numbered(3);
        let ids: Vec<_> = docs.iter().filter_map(|d| d.get_integer("_id")).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn user_carries_identity_field() {
        assert_eq!(user("ann").get_str(PRIVILEGE_ID_FIELD), Some("ann"));
    }

    #[test]
    fn update_entry_targets_id() {
        let entry = oplog::set("app.c", 5, 7, "n", 1);
        assert_eq!(entry.get_str("op"), Some("u"));
        assert_eq!(entry.get_path("o2._id").and_then(|v| v.as_integer()), Some(7));
        assert_eq!(entry.get_timestamp("ts"), Some(Timestamp::new(5, 0)));
    }
}
