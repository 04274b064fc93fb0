//! CLI command implementations.

pub mod dump;
pub mod plan;
pub mod restore;

use docrestore_core::{Document, UnitKind, Value};
use serde_json::{json, Map, Value as Json};

/// Short name of a unit kind for output.
pub fn kind_name(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Data => "data",
        UnitKind::IndexData => "indexes",
        UnitKind::Metadata => "metadata",
        UnitKind::Unknown => "unknown",
        UnitKind::Skip => "skip",
    }
}

/// Renders a document as extended JSON.
pub fn document_to_json(doc: &Document) -> Json {
    doc.iter()
        .map(|(key, value)| (key.to_string(), value_to_json(value)))
        .collect::<Map<_, _>>()
        .into()
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Undefined => json!({"$undefined": true}),
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::from(*n),
        Value::Float(f) => json!({"$numberDouble": f.to_string()}),
        Value::Timestamp(ts) => json!({"$timestamp": {"t": ts.secs, "i": ts.inc}}),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            json!({"$binary": hex})
        }
        Value::Text(s) => Json::from(s.as_str()),
        Value::Array(items) => items.iter().map(value_to_json).collect(),
        Value::Document(doc) => document_to_json(doc),
    }
}

/// Parses a JSON query given on the command line.
pub fn parse_query(text: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let json: Json = serde_json::from_str(text)?;
    docrestore_core::json_to_value(&json)?
        .into_document()
        .ok_or_else(|| "filter must be a JSON object".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_core::Timestamp;

    #[test]
    fn extended_json_output() {
        let doc = Document::new()
            .with("ts", Timestamp::new(5, 1))
            .with("gone", Value::Undefined)
            .with("raw", vec![0xab_u8, 0x01])
            .with("n", 3);
        assert_eq!(
            document_to_json(&doc).to_string(),
            r#"{"ts":{"$timestamp":{"t":5,"i":1}},"gone":{"$undefined":true},"raw":{"$binary":"ab01"},"n":3}"#
        );
    }

    #[test]
    fn query_must_be_an_object() {
        let query = parse_query(r#"{"age": {"$gte": {"$numberLong": "18"}}}"#).unwrap();
        assert_eq!(
            query,
            Document::new().with("age", Document::new().with("$gte", 18))
        );
        assert!(parse_query("[1, 2]").is_err());
        assert!(parse_query("{").is_err());
    }
}
