//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random dump contents that keep the
//! invariants restores depend on (unique `_id` values, valid names,
//! increasing oplog timestamps).

use docrestore_core::{Document, Timestamp, Value};
use proptest::prelude::*;

/// Strategy for generating valid database or collection names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (any::<u32>(), any::<u32>()).prop_map(|(secs, inc)| Timestamp::new(secs, inc))
}

/// Strategy for generating field values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        timestamp_strategy().prop_map(Value::Timestamp),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Document(m.into_iter().collect())),
        ]
    })
}

/// Strategy for generating a collection's records.
///
/// Every record gets a distinct integer `_id` as its first field.
pub fn records_strategy(max_records: usize) -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(
        prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..5),
        0..max_records,
    )
    .prop_map(|bodies| {
        bodies
            .into_iter()
            .enumerate()
            .map(|(id, fields)| {
                let mut doc = Document::with_capacity(fields.len() + 1);
                doc.insert("_id", id as i64);
                for (key, value) in fields {
                    if key != "_id" {
                        doc.insert(key, value);
                    }
                }
                doc
            })
            .collect()
    })
}

/// A generated oplog entry before it is given a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOperation {
    /// Insert `{_id: id}`.
    Insert {
        /// Document id.
        id: i64,
    },
    /// Delete `{_id: id}`.
    Delete {
        /// Document id.
        id: i64,
    },
    /// No-op entry.
    Noop,
}

/// Strategy for generating log operations over a small id space.
pub fn log_operation_strategy() -> impl Strategy<Value = LogOperation> {
    prop_oneof![
        3 => (0i64..16).prop_map(|id| LogOperation::Insert { id }),
        1 => (0i64..16).prop_map(|id| LogOperation::Delete { id }),
        1 => Just(LogOperation::Noop),
    ]
}

/// Strategy for generating an oplog for `ns` with strictly increasing
/// timestamps starting at second 1.
pub fn oplog_strategy(ns: &'static str, max_entries: usize) -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(log_operation_strategy(), 0..max_entries).prop_map(move |ops| {
        ops.into_iter()
            .zip(1u32..)
            .map(|(op, secs)| match op {
                LogOperation::Insert { id } => crate::documents::oplog::insert(ns, secs, id),
                LogOperation::Delete { id } => crate::documents::oplog::delete(ns, secs, id),
                LogOperation::Noop => crate::documents::oplog::noop(secs),
            })
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 256,
        }
    }
}

impl PropTestConfig {
    /// Converts to a proptest config.
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn records_have_distinct_leading_ids(records in records_strategy(16)) {
            for (i, record) in records.iter().enumerate() {
                prop_assert_eq!(record.keys().next(), Some("_id"));
                prop_assert_eq!(record.get_integer("_id"), Some(i as i64));
            }
        }

        #[test]
        fn oplog_timestamps_increase(entries in oplog_strategy("app.c", 20)) {
            let stamps: Vec<_> = entries.iter().filter_map(|e| e.get_timestamp("ts")).collect();
            prop_assert_eq!(stamps.len(), entries.len());
            prop_assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn names_are_usable_namespaces(db in name_strategy(), coll in name_strategy()) {
            let ns = format!("{db}.{coll}");
            prop_assert!(docrestore_core::Namespace::parse(&ns).is_some());
        }
    }
}
