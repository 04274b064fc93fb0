//! Collection metadata sidecars.
//!
//! A data file `<base>.bson` may have a sibling `<base>.metadata.json` holding
//! an object with optional `options` (collection creation options) and
//! `indexes` (index definitions). Values use extended JSON for the kinds plain
//! JSON cannot express:
//!
//! | Wrapper                                | Value                |
//! |----------------------------------------|----------------------|
//! | `{"$undefined": true}`                 | [`Value::Undefined`] |
//! | `{"$timestamp": {"t": 1, "i": 2}}`     | [`Value::Timestamp`] |
//! | `{"$numberLong": "123"}`               | [`Value::Integer`]   |
//! | `{"$numberInt": "12"}`                 | [`Value::Integer`]   |
//! | `{"$numberDouble": "1.5"}`             | [`Value::Float`]     |

use crate::error::{RestoreError, RestoreResult};
use crate::namespace::METADATA_SUFFIX;
use docrestore_codec::{Document, Timestamp, Value};
use serde_json::{Map, Value as Json};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Parsed sidecar content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionMetadata {
    /// Collection creation options.
    pub options: Option<Document>,
    /// Index definitions, in file order.
    pub indexes: Vec<Document>,
}

/// Returns the sidecar path for a data file.
///
/// The base name is the file name up to its last dot, so `users.bson` maps to
/// `users.metadata.json` in the same directory.
#[must_use]
pub fn metadata_path(data_path: &Path) -> PathBuf {
    let name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.rsplit_once('.').map_or(name.as_str(), |(base, _)| base);
    data_path.with_file_name(format!("{base}{METADATA_SUFFIX}"))
}

/// Loads the sidecar for a data file.
///
/// Returns `Ok(None)` if there is no sidecar.
///
/// # Errors
///
/// Returns [`RestoreError::MetadataParse`] if the sidecar exists but is not a
/// valid metadata object, or an I/O error if it cannot be read.
pub fn load_metadata(data_path: &Path) -> RestoreResult<Option<CollectionMetadata>> {
    let path = metadata_path(data_path);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    parse_metadata(&text)
        .map(Some)
        .map_err(|message| RestoreError::metadata_parse(path, message))
}

/// Parses sidecar text.
///
/// # Errors
///
/// Returns a diagnostic if the text is not a metadata object.
pub fn parse_metadata(text: &str) -> Result<CollectionMetadata, String> {
    let json: Json = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Json::Object(root) = json else {
        return Err("metadata must be a JSON object".into());
    };

    let mut metadata = CollectionMetadata::default();

    if let Some(options) = root.get("options") {
        match json_to_value(options)? {
            Value::Document(doc) => metadata.options = Some(doc),
            other => {
                return Err(format!(
                    "options must be an object, got {}",
                    other.type_name()
                ))
            }
        }
    }

    if let Some(indexes) = root.get("indexes") {
        let Json::Array(items) = indexes else {
            return Err("indexes must be an array".into());
        };
        for (i, item) in items.iter().enumerate() {
            match json_to_value(item)? {
                Value::Document(doc) => metadata.indexes.push(doc),
                other => {
                    return Err(format!(
                        "index definition {i} must be an object, got {}",
                        other.type_name()
                    ))
                }
            }
        }
    }

    Ok(metadata)
}

/// Converts extended JSON into a document value.
///
/// # Errors
///
/// Returns a diagnostic for malformed wrappers.
pub fn json_to_value(json: &Json) -> Result<Value, String> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(format!("unrepresentable number {n}"));
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::Array(
            items
                .iter()
                .map(json_to_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Json::Object(map) => match extended_wrapper(map)? {
            Some(value) => value,
            None => {
                let mut doc = Document::with_capacity(map.len());
                for (key, value) in map {
                    doc.insert(key.clone(), json_to_value(value)?);
                }
                Value::Document(doc)
            }
        },
    })
}

fn extended_wrapper(map: &Map<String, Json>) -> Result<Option<Value>, String> {
    if map.len() != 1 {
        return Ok(None);
    }
    let Some((key, inner)) = map.iter().next() else {
        return Ok(None);
    };

    let value = match key.as_str() {
        "$undefined" => Value::Undefined,
        "$timestamp" => {
            let t = inner.get("t").and_then(Json::as_u64);
            let i = inner.get("i").and_then(Json::as_u64);
            match (t, i) {
                (Some(t), Some(i)) => {
                    let secs = u32::try_from(t)
                        .map_err(|_| format!("timestamp t out of range: {t}"))?;
                    let inc = u32::try_from(i)
                        .map_err(|_| format!("timestamp i out of range: {i}"))?;
                    Value::Timestamp(Timestamp::new(secs, inc))
                }
                _ => return Err("$timestamp needs integer t and i".into()),
            }
        }
        "$numberLong" | "$numberInt" => {
            let text = inner
                .as_str()
                .ok_or_else(|| format!("{key} must hold a string"))?;
            let n = text
                .parse::<i64>()
                .map_err(|e| format!("bad {key} {text:?}: {e}"))?;
            if key == "$numberInt" && i32::try_from(n).is_err() {
                return Err(format!("$numberInt out of range: {n}"));
            }
            Value::Integer(n)
        }
        "$numberDouble" => {
            let text = inner
                .as_str()
                .ok_or_else(|| "$numberDouble must hold a string".to_string())?;
            Value::Float(
                text.parse::<f64>()
                    .map_err(|e| format!("bad $numberDouble {text:?}: {e}"))?,
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sidecar_path() {
        assert_eq!(
            metadata_path(Path::new("dump/app/users.bson")),
            PathBuf::from("dump/app/users.metadata.json")
        );
        assert_eq!(
            metadata_path(Path::new("dump/app/system.users.bson")),
            PathBuf::from("dump/app/system.users.metadata.json")
        );
    }

    #[test]
    fn parse_options_and_indexes() {
        let text = r#"{
            "options": {"capped": true, "size": 4096, "flags": {"$undefined": true}},
            "indexes": [
                {"v": 1, "key": {"b": 1, "a": -1}, "name": "b_1_a_-1", "ns": "app.users"}
            ]
        }"#;
        let metadata = parse_metadata(text).unwrap();

        let options = metadata.options.unwrap();
        assert_eq!(options.get("capped"), Some(&Value::Bool(true)));
        assert_eq!(options.get_integer("size"), Some(4096));
        assert!(options.get("flags").unwrap().is_undefined());

        assert_eq!(metadata.indexes.len(), 1);
        let key = metadata.indexes[0].get_document("key").unwrap();
        assert_eq!(key.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn parse_empty_object() {
        assert_eq!(parse_metadata("{}").unwrap(), CollectionMetadata::default());
    }

    #[test]
    fn extended_json_scalars() {
        let json: Json = serde_json::from_str(
            r#"{"ts": {"$timestamp": {"t": 100, "i": 2}},
                "long": {"$numberLong": "9007199254740993"},
                "int": {"$numberInt": "7"},
                "dbl": {"$numberDouble": "2.5"},
                "frac": 0.25}"#,
        )
        .unwrap();
        let doc = json_to_value(&json).unwrap().into_document().unwrap();

        assert_eq!(doc.get_timestamp("ts"), Some(Timestamp::new(100, 2)));
        assert_eq!(doc.get_integer("long"), Some(9_007_199_254_740_993));
        assert_eq!(doc.get_integer("int"), Some(7));
        assert_eq!(doc.get("dbl"), Some(&Value::Float(2.5)));
        assert_eq!(doc.get("frac"), Some(&Value::Float(0.25)));
    }

    #[test]
    fn malformed_wrappers_are_rejected() {
        for text in [
            r#"{"options": {"x": {"$timestamp": {"t": 1}}}}"#,
            r#"{"options": {"x": {"$numberLong": 5}}}"#,
            r#"{"options": {"x": {"$numberInt": "99999999999"}}}"#,
            r#"{"options": 5}"#,
            r#"{"indexes": {}}"#,
            r#"{"indexes": [1]}"#,
            "[]",
            "not json",
        ] {
            assert!(parse_metadata(text).is_err(), "accepted {text}");
        }
    }

    #[test]
    fn load_missing_sidecar_is_none() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("users.bson");
        std::fs::write(&data, b"").unwrap();
        assert!(load_metadata(&data).unwrap().is_none());
    }

    #[test]
    fn load_bad_sidecar_names_the_file() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("users.bson");
        std::fs::write(dir.path().join("users.metadata.json"), b"{oops").unwrap();

        let err = load_metadata(&data).unwrap_err();
        match err {
            RestoreError::MetadataParse { path, .. } => {
                assert!(path.ends_with("users.metadata.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
