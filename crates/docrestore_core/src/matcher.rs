//! Query documents evaluated against records.
//!
//! Used for the restore filter and the oplog replay window. A query is a
//! document of `path: condition` pairs that must all hold. A condition is
//! either a plain value (equality) or a document of operators:
//! `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$exists`, `$in`.
//! Paths may be dotted to reach into sub-documents.

use crate::error::{RestoreError, RestoreResult};
use docrestore_codec::{Document, Value};
use std::cmp::Ordering;

/// Returns true if two values are equal, comparing numbers across kinds.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match a.compare(b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Exists(bool),
    In(Vec<Value>),
}

impl Condition {
    fn parse(op: &str, operand: &Value) -> RestoreResult<Self> {
        Ok(match op {
            "$eq" => Self::Eq(operand.clone()),
            "$ne" => Self::Ne(operand.clone()),
            "$gt" => Self::Gt(operand.clone()),
            "$gte" => Self::Gte(operand.clone()),
            "$lt" => Self::Lt(operand.clone()),
            "$lte" => Self::Lte(operand.clone()),
            "$exists" => Self::Exists(operand.as_bool().ok_or_else(|| {
                RestoreError::invalid_query("$exists needs a boolean operand")
            })?),
            "$in" => Self::In(
                operand
                    .as_array()
                    .ok_or_else(|| RestoreError::invalid_query("$in needs an array operand"))?
                    .to_vec(),
            ),
            other => {
                return Err(RestoreError::invalid_query(format!(
                    "unsupported operator {other}"
                )))
            }
        })
    }

    fn holds(&self, field: Option<&Value>) -> bool {
        match self {
            Self::Exists(expected) => field.is_some() == *expected,
            Self::Ne(operand) => !field.is_some_and(|v| equals_or_contains(v, operand)),
            Self::Eq(operand) => field.is_some_and(|v| equals_or_contains(v, operand)),
            Self::In(operands) => {
                field.is_some_and(|v| operands.iter().any(|o| equals_or_contains(v, o)))
            }
            Self::Gt(operand) => ordered(field, operand, |o| o == Ordering::Greater),
            Self::Gte(operand) => ordered(field, operand, |o| o != Ordering::Less),
            Self::Lt(operand) => ordered(field, operand, |o| o == Ordering::Less),
            Self::Lte(operand) => ordered(field, operand, |o| o != Ordering::Greater),
        }
    }
}

// An array field matches if the whole array or any element matches.
fn equals_or_contains(field: &Value, operand: &Value) -> bool {
    if values_equal(field, operand) {
        return true;
    }
    field
        .as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, operand)))
}

fn ordered(field: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(field) = field else {
        return false;
    };
    match field.as_array() {
        Some(items) => items
            .iter()
            .any(|item| item.compare(operand).is_some_and(&accept)),
        None => field.compare(operand).is_some_and(accept),
    }
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    query: Document,
    clauses: Vec<(String, Vec<Condition>)>,
}

impl Matcher {
    /// Compiles a query document.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::InvalidQuery`] for unknown operators, malformed
    /// operands, or top-level `$` keys.
    pub fn new(query: &Document) -> RestoreResult<Self> {
        let mut clauses = Vec::with_capacity(query.len());
        for (path, condition) in query.iter() {
            if path.starts_with('$') {
                return Err(RestoreError::invalid_query(format!(
                    "unsupported top-level operator {path}"
                )));
            }
            clauses.push((path.to_string(), Self::parse_conditions(condition)?));
        }
        Ok(Self {
            query: query.clone(),
            clauses,
        })
    }

    fn parse_conditions(condition: &Value) -> RestoreResult<Vec<Condition>> {
        match condition.as_document() {
            Some(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => ops
                .iter()
                .map(|(op, operand)| Condition::parse(op, operand))
                .collect(),
            _ => Ok(vec![Condition::Eq(condition.clone())]),
        }
    }

    /// Returns true if the record satisfies every clause.
    #[must_use]
    pub fn matches(&self, record: &Document) -> bool {
        self.clauses.iter().all(|(path, conditions)| {
            let field = record.get_path(path);
            conditions.iter().all(|c| c.holds(field))
        })
    }

    /// The query this matcher was compiled from.
    #[must_use]
    pub fn query(&self) -> &Document {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_codec::Timestamp;

    fn matcher(query: Document) -> Matcher {
        Matcher::new(&query).unwrap()
    }

    #[test]
    fn empty_query_matches_everything() {
        let m = matcher(Document::new());
        assert!(m.matches(&Document::new()));
        assert!(m.matches(&Document::new().with("a", 1)));
    }

    #[test]
    fn equality_and_numbers_across_kinds() {
        let m = matcher(Document::new().with("n", 2));
        assert!(m.matches(&Document::new().with("n", 2.0)));
        assert!(!m.matches(&Document::new().with("n", 3)));
        assert!(!m.matches(&Document::new()));
    }

    #[test]
    fn dotted_paths() {
        let m = matcher(Document::new().with("a.b", "x"));
        let record = Document::new().with("a", Document::new().with("b", "x"));
        assert!(m.matches(&record));
        assert!(!m.matches(&Document::new().with("a", "x")));
    }

    #[test]
    fn timestamp_window() {
        let window = Document::new()
            .with("$gt", Timestamp::new(90, 0))
            .with("$lt", Timestamp::new(100, 2));
        let m = matcher(Document::new().with("ts", window));

        let at = |secs, inc| Document::new().with("ts", Timestamp::new(secs, inc));
        assert!(!m.matches(&at(90, 0)));
        assert!(m.matches(&at(90, 1)));
        assert!(m.matches(&at(100, 1)));
        assert!(!m.matches(&at(100, 2)));
        assert!(!m.matches(&Document::new()));
        // Incomparable kinds never satisfy a range.
        assert!(!m.matches(&Document::new().with("ts", 95)));
    }

    #[test]
    fn ne_exists_in() {
        let m = matcher(Document::new().with("a", Document::new().with("$ne", 1)));
        assert!(m.matches(&Document::new().with("a", 2)));
        assert!(m.matches(&Document::new()));
        assert!(!m.matches(&Document::new().with("a", 1)));

        let m = matcher(Document::new().with("a", Document::new().with("$exists", false)));
        assert!(m.matches(&Document::new()));
        assert!(!m.matches(&Document::new().with("a", Value::Null)));

        let m = matcher(
            Document::new().with("a", Document::new().with("$in", vec![Value::from(1), "x".into()])),
        );
        assert!(m.matches(&Document::new().with("a", "x")));
        assert!(!m.matches(&Document::new().with("a", "y")));
    }

    #[test]
    fn arrays_match_by_element() {
        let m = matcher(Document::new().with("tags", "red"));
        let record = Document::new().with("tags", vec![Value::from("blue"), "red".into()]);
        assert!(m.matches(&record));

        let m = matcher(Document::new().with("n", Document::new().with("$gte", 10)));
        assert!(m.matches(&Document::new().with("n", vec![Value::from(3), 12.into()])));
    }

    #[test]
    fn embedded_document_equality() {
        let inner = Document::new().with("x", 1);
        let m = matcher(Document::new().with("a", inner.clone()));
        assert!(m.matches(&Document::new().with("a", inner)));
        assert!(!m.matches(&Document::new().with("a", Document::new().with("x", 2))));
    }

    #[test]
    fn rejects_unknown_operators() {
        let bad = Document::new().with("a", Document::new().with("$regex", "x"));
        assert!(matches!(
            Matcher::new(&bad),
            Err(RestoreError::InvalidQuery { .. })
        ));
        assert!(Matcher::new(&Document::new().with("$or", Vec::<Value>::new())).is_err());
        let bad = Document::new().with("a", Document::new().with("$exists", 1));
        assert!(Matcher::new(&bad).is_err());
    }
}
